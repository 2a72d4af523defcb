//! The caller-supplied execution function.

use std::future::Future;

use async_trait::async_trait;

use crate::model::JobRecord;

/// Runs one job. Returning `Err` sends the job through the retry policy.
///
/// Each dispatch calls `execute` once and consumes its single result, so a
/// job cannot report completion twice. A panic inside `execute` is caught
/// and treated as an execution error.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    async fn execute(&self, job: JobRecord) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> Executor for F
where
    F: Fn(JobRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn execute(&self, job: JobRecord) -> anyhow::Result<()> {
        (self)(job).await
    }
}
