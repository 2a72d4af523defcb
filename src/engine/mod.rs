//! Queue engine: scheduler bookkeeping, the dispatch loop, and the
//! retry/finalization policy.

pub(crate) mod control;
pub mod policy;
pub(crate) mod scheduler;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tracing::{error, warn};

use crate::config::QueueConfig;
use crate::error::{Error, ProtocolError};
use crate::event::{Emitter, EventKind};
use crate::executor::Executor;
use crate::store::JobStore;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

use scheduler::Scheduler;

/// State shared by the queue handle, the dispatch loop, and job tasks.
pub(crate) struct Core {
    pub config: QueueConfig,
    pub store: JobStore,
    pub scheduler: Scheduler,
    pub events: Emitter,
    pub executor: Arc<dyn Executor>,
    pub destroyed: AtomicBool,
}

impl Core {
    /// Report a failed storage operation. The queue keeps running.
    pub(crate) fn storage_fault(&self, operation: &'static str, err: &Error) {
        warn!(operation, error = %err, "storage operation failed");
        metrics::storage_errors().add(1, &[KeyValue::new("operation", operation)]);
        self.events.emit(EventKind::Error {
            message: format!("{operation}: {err}"),
            protocol: false,
        });
    }

    /// Report a broken scheduler invariant.
    pub(crate) fn protocol_fault(&self, err: ProtocolError) {
        error!(error = %err, "protocol violation");
        self.events.emit(EventKind::Error {
            message: err.to_string(),
            protocol: true,
        });
    }
}
