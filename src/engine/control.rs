//! Dispatch loop: pulls due jobs off the scheduler and runs them.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{Instrument, debug, info, warn};

use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::model::JobRecord;
use crate::telemetry::job::{record_transition, start_job_span};
use crate::telemetry::metrics;

use super::Core;
use super::scheduler::{Entry, Next};

/// The single task that turns scheduler decisions into spawned executions.
pub(crate) struct Dispatcher {
    core: Arc<Core>,
}

impl Dispatcher {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    /// Run until the scheduler is closed.
    pub async fn run(self) {
        debug!(dir = %self.core.store.dir().display(), "dispatch loop started");

        loop {
            while let Some(next) = self.core.scheduler.next(Utc::now()) {
                match next {
                    Next::Ready(job) => self.spawn_execution(job),
                    // Everything behind an early head is due no sooner.
                    Next::Early(entry) => {
                        self.defer(entry);
                        break;
                    }
                }
            }

            if self.core.scheduler.is_closed() {
                info!("dispatch loop stopped");
                return;
            }
            self.core.scheduler.changed().await;
        }
    }

    /// Put a not-yet-due job back after the early-dispatch backoff.
    fn defer(&self, entry: Entry) {
        debug!(id = %entry.job.id, due_at = %entry.job.due_at, "job not due, deferring");
        metrics::jobs_deferred().add(1, &[]);
        let core = Arc::clone(&self.core);
        let delay = core.config.delay_early_job();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            core.scheduler.requeue_deferred(entry);
        });
    }

    fn spawn_execution(&self, job: JobRecord) {
        let core = Arc::clone(&self.core);
        let span = start_job_span(&job.id, job.attempts);
        tokio::spawn(execute(core, job).instrument(span));
    }
}

/// Persist the claimed record, run it, and hand the result to the policy.
async fn execute(core: Arc<Core>, job: JobRecord) {
    let span = tracing::Span::current();
    record_transition(&span, "pending", "processing");
    metrics::jobs_dispatched().add(1, &[]);

    let started = Instant::now();
    // The attempt count must be durable before the executor sees the job.
    let result = match core.store.persist(&job).await {
        Ok(()) => run_executor(&core.executor, job.clone()).await,
        Err(e) => {
            warn!(id = %job.id, error = %e, "could not persist job before execution");
            core.storage_fault("persist", &e);
            Err(e)
        }
    };

    core.settle(job, result, started.elapsed()).await;
}

/// Run the executor in its own task so a panic becomes an ordinary failure.
async fn run_executor(executor: &Arc<dyn Executor>, job: JobRecord) -> Result<()> {
    let executor = Arc::clone(executor);
    let handle = tokio::spawn(
        async move { executor.execute(job).await }.instrument(tracing::Span::current()),
    );

    match handle.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::Execution(format!("{e:#}"))),
        Err(join) if join.is_panic() => {
            let panic = join.into_panic();
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(Error::Execution(format!("executor panicked: {message}")))
        }
        Err(join) => Err(Error::Execution(format!("executor task cancelled: {join}"))),
    }
}
