//! Typed configuration.
//!
//! [`QueueConfig`] carries every queue option and can be built in code or
//! loaded from TOML. [`Config`] is the process-level configuration the
//! binary reads from environment variables at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Disposition;

// ---------------------------------------------------------------------------
// Queue configuration
// ---------------------------------------------------------------------------

/// Upper bound for every `_ms` delay option: 100 years.
pub const MAX_DELAY_MS: u64 = 100 * 365 * 24 * 60 * 60 * 1000;

/// How recovery treats a job file that cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Abort recovery and fail queue construction.
    #[default]
    FailFast,
    /// Rename the file to a hidden `.corrupt-` name and continue.
    Quarantine,
}

/// Options for a single queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Directory holding one file per pending job.
    pub directory: PathBuf,
    /// Resume dispatching as soon as recovery finishes.
    pub auto_start: bool,
    /// Maximum simultaneous executions.
    pub concurrency: usize,
    /// Maximum simultaneous file loads during recovery.
    pub reload_concurrency: usize,
    /// Backoff before an early (not yet due) job is looked at again.
    pub delay_early_job_ms: u64,
    /// Retry failed executions.
    pub retry_failed_jobs: bool,
    /// Delay added to `due_at` when a job is retried.
    pub retry_failed_job_delay_ms: u64,
    /// Retry budget. Zero or negative means unlimited.
    pub max_job_failures: i64,
    /// What to do with the file of a successful job.
    pub on_success: Disposition,
    /// What to do with the file of a permanently failed job.
    pub on_failure: Disposition,
    /// Indent persisted records.
    pub prettify_json: bool,
    /// Minimum delay between a push and the job becoming eligible.
    pub push_delay_ms: u64,
    /// Poll interval while shutdown waits for in-flight jobs.
    pub shutdown_poll_ms: u64,
    pub recovery: RecoveryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            directory: std::env::temp_dir().join(format!("jobspool-{}", uuid::Uuid::new_v4())),
            auto_start: true,
            concurrency: 1,
            reload_concurrency: 10,
            delay_early_job_ms: 100,
            retry_failed_jobs: false,
            retry_failed_job_delay_ms: 1_000,
            max_job_failures: 0,
            on_success: Disposition::Move,
            on_failure: Disposition::Move,
            prettify_json: false,
            push_delay_ms: 1,
            shutdown_poll_ms: 50,
            recovery: RecoveryPolicy::FailFast,
        }
    }
}

impl QueueConfig {
    /// Defaults with the given directory.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Load a TOML file. Missing keys take their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read queue config {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad queue config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        if self.reload_concurrency == 0 {
            return Err(Error::Config(
                "reload_concurrency must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("delay_early_job_ms", self.delay_early_job_ms),
            ("retry_failed_job_delay_ms", self.retry_failed_job_delay_ms),
            ("push_delay_ms", self.push_delay_ms),
            ("shutdown_poll_ms", self.shutdown_poll_ms),
        ] {
            if value > MAX_DELAY_MS {
                return Err(Error::Config(format!(
                    "{name} must be at most {MAX_DELAY_MS} ms, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// True when failed jobs may be retried without limit.
    pub fn unlimited_failures(&self) -> bool {
        self.max_job_failures <= 0
    }

    pub fn delay_early_job(&self) -> Duration {
        Duration::from_millis(self.delay_early_job_ms)
    }

    pub fn retry_failed_job_delay(&self) -> Duration {
        Duration::from_millis(self.retry_failed_job_delay_ms)
    }

    pub fn push_delay(&self) -> Duration {
        Duration::from_millis(self.push_delay_ms)
    }

    pub fn shutdown_poll(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_ms)
    }
}

// ---------------------------------------------------------------------------
// Process configuration
// ---------------------------------------------------------------------------

/// Process configuration for the `jobspool` binary.
#[derive(Debug)]
pub struct Config {
    pub queue_dir: Option<PathBuf>,
    pub queue_config: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            queue_dir: std::env::var("JOBSPOOL_DIR").ok().map(PathBuf::from),
            queue_config: std::env::var("JOBSPOOL_CONFIG").ok().map(PathBuf::from),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Resolve the queue configuration: the TOML file if one is set, then
    /// the directory override.
    pub fn queue(&self, dir_override: Option<PathBuf>) -> Result<QueueConfig> {
        let mut queue = match self.queue_config {
            Some(ref path) => QueueConfig::from_toml_file(path)?,
            None => QueueConfig::default(),
        };
        if let Some(dir) = dir_override.or_else(|| self.queue_dir.clone()) {
            queue.directory = dir;
        }
        Ok(queue)
    }
}
