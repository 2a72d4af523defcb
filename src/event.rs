//! Structured events emitted by the queue on every lifecycle change.
//!
//! Observers either register callbacks with [`Emitter::on`] or take a
//! broadcast receiver from [`Emitter::subscribe`]. Callbacks run on the
//! emitting task, so they should be quick and must not block.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{JobId, JobRecord};

/// Capacity of the broadcast channel. Slow subscribers observe `Lagged`.
const BROADCAST_CAPACITY: usize = 1024;

/// A structured event emitted by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    /// When this event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    /// Recovery finished and the queue is usable.
    #[serde(rename = "ready")]
    Ready { recovered: usize },
    #[serde(rename = "pause")]
    Pause,
    #[serde(rename = "resume")]
    Resume,
    /// The queue was destroyed.
    #[serde(rename = "end")]
    End,
    /// Every execution slot is occupied.
    #[serde(rename = "saturated")]
    Saturated,
    /// No pending jobs remain; some may still be executing.
    #[serde(rename = "empty")]
    Empty,
    /// No pending and no in-flight jobs.
    #[serde(rename = "drain")]
    Drain,
    #[serde(rename = "job:queue")]
    JobQueued { job: JobRecord },
    #[serde(rename = "job:complete")]
    JobCompleted { job: JobRecord },
    /// Permanent failure: no retry will follow.
    #[serde(rename = "job:fail")]
    JobFailed { job: JobRecord, error: String },
    /// One execution attempt returned an error.
    #[serde(rename = "job:error")]
    JobError { job: JobRecord, error: String },
    #[serde(rename = "job:retry")]
    JobRetried { job: JobRecord },
    /// The job's file was deleted.
    #[serde(rename = "job:destroy")]
    JobDestroyed { id: JobId },
    /// Storage or protocol fault that did not stop the queue.
    #[serde(rename = "error")]
    Error { message: String, protocol: bool },
}

impl EventKind {
    pub fn name(&self) -> EventName {
        match self {
            EventKind::Ready { .. } => EventName::Ready,
            EventKind::Pause => EventName::Pause,
            EventKind::Resume => EventName::Resume,
            EventKind::End => EventName::End,
            EventKind::Saturated => EventName::Saturated,
            EventKind::Empty => EventName::Empty,
            EventKind::Drain => EventName::Drain,
            EventKind::JobQueued { .. } => EventName::JobQueue,
            EventKind::JobCompleted { .. } => EventName::JobComplete,
            EventKind::JobFailed { .. } => EventName::JobFail,
            EventKind::JobError { .. } => EventName::JobError,
            EventKind::JobRetried { .. } => EventName::JobRetry,
            EventKind::JobDestroyed { .. } => EventName::JobDestroy,
            EventKind::Error { .. } => EventName::Error,
        }
    }
}

/// Event names observers can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    Ready,
    Pause,
    Resume,
    End,
    Saturated,
    Empty,
    Drain,
    JobQueue,
    JobComplete,
    JobFail,
    JobError,
    JobRetry,
    JobDestroy,
    Error,
}

impl EventName {
    pub fn as_str(self) -> &'static str {
        match self {
            EventName::Ready => "ready",
            EventName::Pause => "pause",
            EventName::Resume => "resume",
            EventName::End => "end",
            EventName::Saturated => "saturated",
            EventName::Empty => "empty",
            EventName::Drain => "drain",
            EventName::JobQueue => "job:queue",
            EventName::JobComplete => "job:complete",
            EventName::JobFail => "job:fail",
            EventName::JobError => "job:error",
            EventName::JobRetry => "job:retry",
            EventName::JobDestroy => "job:destroy",
            EventName::Error => "error",
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback invoked for matching events.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Fan-out point for queue events. Cheap to clone.
#[derive(Clone)]
pub struct Emitter {
    inner: Arc<EmitterInner>,
}

struct EmitterInner {
    seq: AtomicU64,
    tx: broadcast::Sender<Event>,
    handlers: RwLock<Vec<(Option<EventName>, Handler)>>,
}

impl Emitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(EmitterInner {
                seq: AtomicU64::new(0),
                tx,
                handlers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a callback for one event name.
    pub fn on(&self, name: EventName, handler: impl Fn(&Event) + Send + Sync + 'static) {
        self.register(Some(name), Arc::new(handler));
    }

    /// Register a callback for every event.
    pub fn on_any(&self, handler: impl Fn(&Event) + Send + Sync + 'static) {
        self.register(None, Arc::new(handler));
    }

    fn register(&self, name: Option<EventName>, handler: Handler) {
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handlers.push((name, handler));
    }

    /// A receiver that sees every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.tx.subscribe()
    }

    /// Stamp and deliver an event.
    pub fn emit(&self, kind: EventKind) -> Event {
        let event = Event {
            seq: self.inner.seq.fetch_add(1, Ordering::SeqCst) + 1,
            timestamp: Utc::now(),
            kind,
        };
        let name = event.kind.name();

        // Snapshot so handlers may register further handlers without deadlock.
        let matching: Vec<Handler> = {
            let handlers = self
                .inner
                .handlers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            handlers
                .iter()
                .filter(|(filter, _)| filter.is_none_or(|n| n == name))
                .map(|(_, h)| Arc::clone(h))
                .collect()
        };
        for handler in matching {
            handler(&event);
        }

        // No receivers is fine.
        let _ = self.inner.tx.send(event.clone());
        event
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn handlers_only_see_their_event() {
        let emitter = Emitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        emitter.on(EventName::Pause, move |e| {
            sink.lock().unwrap().push(e.kind.name());
        });

        emitter.emit(EventKind::Resume);
        emitter.emit(EventKind::Pause);
        emitter.emit(EventKind::Drain);

        assert_eq!(*seen.lock().unwrap(), vec![EventName::Pause]);
    }

    #[test]
    fn sequence_numbers_are_monotonic() {
        let emitter = Emitter::new();
        let a = emitter.emit(EventKind::Empty);
        let b = emitter.emit(EventKind::Drain);
        assert!(b.seq > a.seq);
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let emitter = Emitter::new();
        let mut rx = emitter.subscribe();
        emitter.emit(EventKind::Saturated);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind.name(), EventName::Saturated);
    }

    #[test]
    fn serialized_names_match_event_names() {
        let value = serde_json::to_value(EventKind::JobDestroyed { id: JobId::new() }).unwrap();
        assert_eq!(value["type"], EventName::JobDestroy.as_str());
    }
}
