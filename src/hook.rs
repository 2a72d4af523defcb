//! Executor that runs an external command per job.
//!
//! The command receives the job payload as JSON on stdin, plus
//! `JOBSPOOL_JOB_ID`, `JOBSPOOL_JOB_FILE`, and `JOBSPOOL_ATTEMPT` in its
//! environment. A zero exit status is success; anything else is a failed
//! attempt.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::executor::Executor;
use crate::model::JobRecord;

/// Runs one command per job.
#[derive(Debug, Clone)]
pub struct HookExecutor {
    command: PathBuf,
    args: Vec<String>,
}

impl HookExecutor {
    /// Relative command paths are resolved against the current directory
    /// now, not at execution time.
    pub fn new(command: impl AsRef<Path>, args: Vec<String>) -> std::io::Result<Self> {
        let command = command.as_ref();
        let command = if command.is_relative() && command.components().count() > 1 {
            std::env::current_dir()?.join(command)
        } else {
            command.to_path_buf()
        };
        Ok(Self { command, args })
    }

    pub fn command(&self) -> &Path {
        &self.command
    }
}

#[async_trait]
impl Executor for HookExecutor {
    async fn execute(&self, job: JobRecord) -> anyhow::Result<()> {
        let start = Instant::now();
        debug!(
            id = %job.id,
            command = %self.command.display(),
            "running hook"
        );

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .current_dir(job.directory())
            .env("JOBSPOOL_JOB_ID", job.id.to_string())
            .env("JOBSPOOL_JOB_FILE", job.file())
            .env("JOBSPOOL_ATTEMPT", job.attempts.to_string())
            .stdin(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let input = serde_json::to_vec(&job.payload)?;
            match stdin.write_all(&input).await {
                // A hook may exit without reading its input.
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e.into()),
                _ => {}
            }
        }

        let status = child.wait().await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        if status.success() {
            info!(id = %job.id, duration_ms, "hook completed");
            Ok(())
        } else {
            anyhow::bail!(
                "hook {} exited with status {}",
                self.command.display(),
                status.code().unwrap_or(-1)
            )
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use chrono::Utc;

    fn job(dir: &Path) -> JobRecord {
        crate::store::JobStore::new(dir, false).create(serde_json::json!({"n": 7}), Utc::now())
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let hook = HookExecutor::new("sh", vec!["-c".into(), "cat > /dev/null".into()]).unwrap();
        hook.execute(job(dir.path())).await.unwrap();
    }

    #[tokio::test]
    async fn hook_sees_payload_and_environment() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"line=$(cat); [ "$line" = '{"n":7}' ] && [ "$JOBSPOOL_ATTEMPT" = 0 ] && [ -n "$JOBSPOOL_JOB_ID" ]"#;
        let hook = HookExecutor::new("sh", vec!["-c".into(), script.into()]).unwrap();
        hook.execute(job(dir.path())).await.unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let hook = HookExecutor::new("sh", vec!["-c".into(), "exit 3".into()]).unwrap();
        let err = hook.execute(job(dir.path())).await.unwrap_err();
        assert!(err.to_string().contains("status 3"));
    }
}
