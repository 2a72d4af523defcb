//! # jobspool
//!
//! Disk-durable job queue for a single process.
//!
//! Producers push jobs with a due time; a bounded pool of tokio tasks runs
//! them in due-time order. Each job is persisted as one JSON file before it
//! runs, so a crash loses nothing: the next [`Queue::open`] over the same
//! directory picks every pending job back up.
//!
//! ```no_run
//! use jobspool::{Queue, QueueConfig};
//!
//! # async fn demo() -> jobspool::Result<()> {
//! let queue = Queue::open(QueueConfig::new("/var/spool/mail"), |job: jobspool::JobRecord| async move {
//!     println!("sending {}", job.payload);
//!     Ok(())
//! })
//! .await?;
//!
//! queue.push(serde_json::json!({"to": "ops@example.com"})).await?;
//! queue.destroy().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod executor;
pub mod hook;
pub mod model;
pub mod queue;
pub mod recovery;
pub mod store;
pub mod telemetry;

pub use config::{QueueConfig, RecoveryPolicy};
pub use error::{Error, ProtocolError, Result};
pub use event::{Emitter, Event, EventKind, EventName};
pub use executor::Executor;
pub use hook::HookExecutor;
pub use model::{Disposition, JobId, JobRecord, Outcome, PushOptions};
pub use queue::Queue;
pub use store::JobStore;
