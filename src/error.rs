//! Error types for jobspool.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::JobId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt job record {}: {source}", path.display())]
    Deserialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize job record: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("job execution failed: {0}")]
    Execution(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("telemetry error: {0}")]
    Telemetry(String),
}

impl Error {
    /// True for programming errors (misuse of the queue API or a scheduler
    /// bookkeeping fault), as opposed to storage or job failures.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}

/// Misuse of the queue API, or a scheduler invariant that did not hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("job {0} is not in flight and cannot be retried manually")]
    NotInFlight(JobId),

    #[error("queue has been destroyed")]
    Destroyed,

    #[error("completion reported twice for job {0}")]
    DuplicateCompletion(JobId),
}

pub type Result<T> = std::result::Result<T, Error>;
