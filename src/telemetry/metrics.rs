//! Metric instrument factories for jobspool.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"jobspool"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for jobspool instruments.
fn meter() -> Meter {
    opentelemetry::global::meter(super::INSTRUMENTATION_NAME)
}

/// Counter: jobs accepted by `push`.
pub fn jobs_pushed() -> Counter<u64> {
    meter()
        .u64_counter("jobspool.jobs.pushed")
        .with_description("Number of jobs pushed")
        .build()
}

/// Counter: jobs handed to the executor.
pub fn jobs_dispatched() -> Counter<u64> {
    meter()
        .u64_counter("jobspool.jobs.dispatched")
        .with_description("Number of execution attempts started")
        .build()
}

/// Counter: jobs popped before their due time and put back.
pub fn jobs_deferred() -> Counter<u64> {
    meter()
        .u64_counter("jobspool.jobs.deferred")
        .with_description("Number of early dispatches deferred")
        .build()
}

/// Counter: terminal outcomes.
/// Labels: `outcome` ("success" | "failed").
pub fn jobs_finished() -> Counter<u64> {
    meter()
        .u64_counter("jobspool.jobs.finished")
        .with_description("Number of jobs reaching a terminal outcome")
        .build()
}

/// Counter: retries scheduled.
/// Labels: `reason` ("failure" | "manual").
pub fn jobs_retried() -> Counter<u64> {
    meter()
        .u64_counter("jobspool.jobs.retried")
        .with_description("Number of retries scheduled")
        .build()
}

/// Counter: jobs loaded from disk at startup.
pub fn jobs_recovered() -> Counter<u64> {
    meter()
        .u64_counter("jobspool.jobs.recovered")
        .with_description("Number of jobs recovered from the queue directory")
        .build()
}

/// Counter: storage operations that failed outside the execution path.
/// Labels: `operation`.
pub fn storage_errors() -> Counter<u64> {
    meter()
        .u64_counter("jobspool.storage.errors")
        .with_description("Number of failed persist, rename, or delete operations")
        .build()
}

/// Histogram: execution duration in milliseconds.
/// Labels: `outcome`.
pub fn execution_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("jobspool.execution.duration_ms")
        .with_description("Job execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
