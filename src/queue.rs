//! The public queue handle.
//!
//! A [`Queue`] owns one directory. Opening it recovers whatever jobs the
//! directory holds, starts the dispatch loop, and (with `auto_start`)
//! resumes dispatching. Handles are cheap to clone; all clones drive the
//! same queue, which is how an executor can call [`Queue::retry`] on the
//! job it is running.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::engine::Core;
use crate::engine::control::Dispatcher;
use crate::engine::scheduler::Scheduler;
use crate::error::{Error, ProtocolError, Result};
use crate::event::{Emitter, Event, EventKind, EventName};
use crate::executor::Executor;
use crate::model::job::due_in;
use crate::model::{JobId, JobRecord, PushOptions};
use crate::recovery::recover;
use crate::store::JobStore;
use crate::telemetry::metrics;

/// Handle to a running queue.
#[derive(Clone)]
pub struct Queue {
    core: Arc<Core>,
    dispatcher: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Queue {
    /// Open the queue with a fresh event emitter.
    pub async fn open(config: QueueConfig, executor: impl Executor) -> Result<Self> {
        Self::open_with_events(config, executor, Emitter::new()).await
    }

    /// Open the queue, delivering events to an emitter the caller already
    /// holds. Handlers registered beforehand see `ready` and any events
    /// fired during startup.
    pub async fn open_with_events(
        config: QueueConfig,
        executor: impl Executor,
        events: Emitter,
    ) -> Result<Self> {
        config.validate()?;
        let store = JobStore::open(&config.directory, config.prettify_json).await?;
        let recovered = recover(&store, config.reload_concurrency, config.recovery).await?;

        let scheduler = Scheduler::new(config.concurrency, events.clone());
        let count = recovered.jobs.len();
        for job in recovered.jobs {
            scheduler.push(job, None);
        }

        let auto_start = config.auto_start;
        let core = Arc::new(Core {
            config,
            store,
            scheduler,
            events,
            executor: Arc::new(executor),
            destroyed: AtomicBool::new(false),
        });
        let handle = tokio::spawn(Dispatcher::new(Arc::clone(&core)).run());

        let queue = Self {
            core,
            dispatcher: Arc::new(Mutex::new(Some(handle))),
        };

        info!(
            dir = %queue.core.store.dir().display(),
            recovered = count,
            concurrency = queue.core.config.concurrency,
            "queue ready"
        );
        queue.core.events.emit(EventKind::Ready { recovered: count });

        if auto_start {
            queue.resume()?;
        }
        Ok(queue)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.core.destroyed.load(Ordering::SeqCst) {
            return Err(ProtocolError::Destroyed.into());
        }
        Ok(())
    }

    /// Persist a new job due after the configured push delay.
    pub async fn push<T: Serialize>(&self, payload: T) -> Result<JobRecord> {
        self.push_with(payload, PushOptions::default()).await
    }

    /// Persist a new job and schedule it.
    ///
    /// A job is never eligible earlier than the push delay after this call,
    /// even when `options` names a due time in the past.
    pub async fn push_with<T: Serialize>(
        &self,
        payload: T,
        options: PushOptions,
    ) -> Result<JobRecord> {
        self.ensure_alive()?;
        let payload = serde_json::to_value(payload).map_err(Error::Serialize)?;

        let not_before = due_in(self.core.config.push_delay());
        let due_at = options.due_at.unwrap_or(not_before);
        let job = self.core.store.create(payload, due_at);
        self.core.store.persist(&job).await?;

        metrics::jobs_pushed().add(1, &[]);
        info!(id = %job.id, due_at = %job.due_at, "job queued");
        self.core
            .events
            .emit(EventKind::JobQueued { job: job.clone() });

        if !self.core.scheduler.push(job.clone(), Some(not_before)) {
            warn!(id = %job.id, "queue closed during push; job left on disk");
        }
        Ok(job)
    }

    /// Stop dispatching new jobs. Running jobs are not interrupted.
    pub fn pause(&self) -> Result<()> {
        self.ensure_alive()?;
        if self.core.scheduler.pause() {
            info!("queue paused");
            self.core.events.emit(EventKind::Pause);
        }
        Ok(())
    }

    /// Resume dispatching.
    pub fn resume(&self) -> Result<()> {
        self.ensure_alive()?;
        if self.core.scheduler.resume() {
            info!("queue resumed");
            self.core.events.emit(EventKind::Resume);
        }
        Ok(())
    }

    pub fn is_paused(&self) -> Result<bool> {
        self.ensure_alive()?;
        Ok(self.core.scheduler.is_paused())
    }

    /// Jobs waiting to be dispatched. Running jobs are not counted.
    pub fn count(&self) -> Result<usize> {
        self.ensure_alive()?;
        Ok(self.core.scheduler.pending())
    }

    /// Jobs currently executing.
    pub fn in_flight(&self) -> Result<usize> {
        self.ensure_alive()?;
        Ok(self.core.scheduler.running())
    }

    /// Reschedule a running job once its current execution returns,
    /// whatever the outcome. Fails if the job is not in flight.
    pub fn retry(&self, id: JobId) -> Result<()> {
        self.ensure_alive()?;
        self.core.scheduler.request_retry(id)?;
        info!(%id, "manual retry requested");
        Ok(())
    }

    /// Event emitter for registering handlers or subscribing.
    pub fn events(&self) -> Result<&Emitter> {
        self.ensure_alive()?;
        Ok(&self.core.events)
    }

    /// Call `handler` for every event named `name`.
    pub fn on(
        &self,
        name: EventName,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<()> {
        self.events()?.on(name, handler);
        Ok(())
    }

    /// Call `handler` for every event.
    pub fn on_any(&self, handler: impl Fn(&Event) + Send + Sync + 'static) -> Result<()> {
        self.events()?.on_any(handler);
        Ok(())
    }

    pub fn subscribe(&self) -> Result<broadcast::Receiver<Event>> {
        Ok(self.events()?.subscribe())
    }

    pub fn directory(&self) -> Result<&Path> {
        self.ensure_alive()?;
        Ok(self.core.store.dir())
    }

    /// Pause and wait until every running job has settled. Pending jobs stay
    /// queued (and on disk).
    pub async fn shutdown(&self) -> Result<()> {
        self.pause()?;
        let poll = self.core.config.shutdown_poll();
        loop {
            let running = self.core.scheduler.running();
            if running == 0 {
                break;
            }
            debug!(running, "waiting for running jobs");
            tokio::time::sleep(poll).await;
        }
        info!("queue shut down");
        Ok(())
    }

    /// Shut down, stop the dispatch loop, and make this queue unusable.
    pub async fn destroy(&self) -> Result<()> {
        self.shutdown().await?;
        if self.core.destroyed.swap(true, Ordering::SeqCst) {
            return Err(ProtocolError::Destroyed.into());
        }
        self.core.scheduler.close();

        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "dispatch loop ended abnormally");
            }
        }

        info!("queue destroyed");
        self.core.events.emit(EventKind::End);
        Ok(())
    }
}
