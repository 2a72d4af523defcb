//! Retry and finalization policy, applied once per returned execution.

use std::time::Duration;

use opentelemetry::KeyValue;
use tracing::{Span, info, warn};

use crate::config::QueueConfig;
use crate::error::Result;
use crate::event::EventKind;
use crate::model::job::due_in;
use crate::model::{Disposition, JobRecord, Outcome};
use crate::store::Finalized;
use crate::telemetry::job::{record_outcome, record_transition};
use crate::telemetry::metrics;

use super::Core;

/// Why a job goes back on the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// The execution failed and the retry budget allows another attempt.
    Failure,
    /// A caller asked for it while the job was running.
    Manual,
}

impl RetryReason {
    fn as_str(self) -> &'static str {
        match self {
            RetryReason::Failure => "failure",
            RetryReason::Manual => "manual",
        }
    }
}

/// What to do with a job whose execution just returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry(RetryReason),
    Finalize {
        outcome: Outcome,
        disposition: Disposition,
    },
}

/// Decide the fate of a returned execution.
///
/// `attempts` already counts the attempt that just returned. A manual
/// retry request wins over everything, including an exhausted budget.
pub fn decide(config: &QueueConfig, attempts: u32, failed: bool, manual_retry: bool) -> Decision {
    if manual_retry {
        return Decision::Retry(RetryReason::Manual);
    }
    if !failed {
        return Decision::Finalize {
            outcome: Outcome::Success,
            disposition: config.on_success,
        };
    }
    let within_budget =
        config.unlimited_failures() || i64::from(attempts) < config.max_job_failures;
    if config.retry_failed_jobs && within_budget {
        Decision::Retry(RetryReason::Failure)
    } else {
        Decision::Finalize {
            outcome: Outcome::Failed,
            disposition: config.on_failure,
        }
    }
}

impl Core {
    /// Apply the policy to a returned execution and free its slot.
    pub(crate) async fn settle(&self, mut job: JobRecord, result: Result<()>, elapsed: Duration) {
        let span = Span::current();

        let manual_retry = match self.scheduler.seal(job.id) {
            Ok(manual) => manual,
            Err(e) => {
                self.protocol_fault(e);
                return;
            }
        };

        let error = result.err().map(|e| e.to_string());
        let label = if error.is_some() { "error" } else { "ok" };
        metrics::execution_duration_ms().record(
            elapsed.as_secs_f64() * 1000.0,
            &[KeyValue::new("outcome", label)],
        );

        if let Some(ref error) = error {
            warn!(id = %job.id, attempts = job.attempts, %error, "job attempt failed");
            self.events.emit(EventKind::JobError {
                job: job.clone(),
                error: error.clone(),
            });
        }

        job.processing = false;
        let requeue = match decide(&self.config, job.attempts, error.is_some(), manual_retry) {
            Decision::Retry(reason) => {
                job.due_at = due_in(self.config.retry_failed_job_delay());
                if let Err(e) = self.store.persist(&job).await {
                    self.storage_fault("persist", &e);
                }
                record_transition(&span, "processing", "pending");
                record_outcome(&span, "retry");
                metrics::jobs_retried().add(1, &[KeyValue::new("reason", reason.as_str())]);
                info!(id = %job.id, attempts = job.attempts, due_at = %job.due_at, reason = reason.as_str(), "job retry scheduled");
                self.events
                    .emit(EventKind::JobRetried { job: job.clone() });
                Some(job.clone())
            }
            Decision::Finalize {
                outcome,
                disposition,
            } => {
                record_transition(&span, "processing", &outcome.to_string());
                record_outcome(&span, &outcome.to_string());
                metrics::jobs_finished().add(1, &[KeyValue::new("outcome", outcome.to_string())]);
                match error {
                    None => {
                        info!(id = %job.id, attempts = job.attempts, "job completed");
                        self.events
                            .emit(EventKind::JobCompleted { job: job.clone() });
                    }
                    Some(error) => {
                        warn!(id = %job.id, attempts = job.attempts, "job failed permanently");
                        self.events.emit(EventKind::JobFailed {
                            job: job.clone(),
                            error,
                        });
                    }
                }
                match self.store.finalize(&job, outcome, disposition).await {
                    Ok(Finalized::Destroyed) => {
                        self.events.emit(EventKind::JobDestroyed { id: job.id });
                    }
                    Ok(Finalized::Moved(_)) => {}
                    Err(e) => self.storage_fault("finalize", &e),
                }
                None
            }
        };

        if let Err(e) = self.scheduler.release(job.id, requeue) {
            self.protocol_fault(e);
        }
    }
}
