//! Job execution span helpers.
//!
//! Provides span creation and transition recording for jobs flowing
//! through the queue.

use tracing::Span;

use crate::model::JobId;

/// Start a span for one execution attempt.
///
/// The `job.outcome` field is declared empty and filled in by
/// [`record_outcome`].
pub fn start_job_span(id: &JobId, attempt: u32) -> Span {
    tracing::info_span!(
        "job.execute",
        "job.id" = %id,
        "job.attempt" = attempt,
        "job.outcome" = tracing::field::Empty,
    )
}

/// Record a lifecycle transition as an event scoped to the given span.
pub fn record_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "job_transition");
    });
}

/// Fill the span's outcome field.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("job.outcome", outcome);
}
