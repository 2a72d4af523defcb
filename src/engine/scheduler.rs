//! Priority scheduler: pending jobs ordered by due time, bounded in-flight set.
//!
//! All bookkeeping sits behind one mutex and is never held across an await
//! or while observers run. The dispatch loop is the only consumer of
//! [`Scheduler::next`]; everything else pushes, releases, or toggles state
//! and pokes the loop through a [`Notify`].

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::error::ProtocolError;
use crate::event::{Emitter, EventKind};
use crate::model::{JobId, JobRecord};

/// A pending job plus its ordering key.
#[derive(Debug)]
pub(crate) struct Entry {
    pub job: JobRecord,
    /// In-memory eligibility floor for freshly pushed jobs. Not persisted and
    /// not part of the ordering key.
    pub not_before: Option<DateTime<Utc>>,
    seq: u64,
}

impl Entry {
    fn eligible_at(&self) -> DateTime<Utc> {
        match self.not_before {
            Some(floor) if floor > self.job.due_at => floor,
            _ => self.job.due_at,
        }
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    /// Reversed so the max-heap pops the earliest due time, then the
    /// earliest insertion.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .job
            .due_at
            .cmp(&self.job.due_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// What the dispatch loop should do with the next pending job.
#[derive(Debug)]
pub(crate) enum Next {
    /// Slot taken, `attempts` incremented, `processing` set.
    Ready(JobRecord),
    /// Not due yet. Hand back through [`Scheduler::requeue_deferred`].
    Early(Entry),
}

#[derive(Debug, Default)]
struct InFlight {
    manual_retry: bool,
    sealed: bool,
}

#[derive(Debug)]
struct State {
    pending: BinaryHeap<Entry>,
    next_seq: u64,
    /// Early jobs sleeping out their backoff. Still counted as pending.
    deferred: usize,
    in_flight: HashMap<JobId, InFlight>,
    paused: bool,
    closed: bool,
}

impl State {
    fn drained(&self) -> bool {
        self.pending.is_empty() && self.deferred == 0 && self.in_flight.is_empty()
    }
}

pub(crate) struct Scheduler {
    state: Mutex<State>,
    wake: Notify,
    concurrency: usize,
    events: Emitter,
}

impl Scheduler {
    /// A paused scheduler with `concurrency` execution slots.
    pub fn new(concurrency: usize, events: Emitter) -> Self {
        Self {
            state: Mutex::new(State {
                pending: BinaryHeap::new(),
                next_seq: 0,
                deferred: 0,
                in_flight: HashMap::new(),
                paused: true,
                closed: false,
            }),
            wake: Notify::new(),
            concurrency: concurrency.max(1),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a pending job. Returns false once the scheduler is closed.
    pub fn push(&self, job: JobRecord, not_before: Option<DateTime<Utc>>) -> bool {
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            insert(&mut state, job, not_before);
        }
        self.wake.notify_one();
        true
    }

    /// Pop the earliest pending job if a slot is free and dispatching is on.
    pub fn next(&self, now: DateTime<Utc>) -> Option<Next> {
        let mut signals = Vec::new();
        let next = {
            let mut state = self.lock();
            if state.closed || state.paused || state.in_flight.len() >= self.concurrency {
                return None;
            }
            let entry = state.pending.pop()?;

            if entry.eligible_at() > now {
                state.deferred += 1;
                Next::Early(entry)
            } else {
                let mut job = entry.job;
                job.processing = true;
                job.attempts += 1;
                state.in_flight.insert(job.id, InFlight::default());

                if state.pending.is_empty() && state.deferred == 0 {
                    signals.push(EventKind::Empty);
                }
                if state.in_flight.len() == self.concurrency {
                    signals.push(EventKind::Saturated);
                }
                Next::Ready(job)
            }
        };
        for kind in signals {
            self.events.emit(kind);
        }
        Some(next)
    }

    /// Return an early job after its backoff. Dropped if closed meanwhile;
    /// its file stays on disk for the next recovery.
    pub fn requeue_deferred(&self, entry: Entry) {
        {
            let mut state = self.lock();
            state.deferred = state.deferred.saturating_sub(1);
            if state.closed {
                return;
            }
            insert(&mut state, entry.job, entry.not_before);
        }
        self.wake.notify_one();
    }

    /// Flag an in-flight job to be rescheduled when its execution returns.
    pub fn request_retry(&self, id: JobId) -> Result<(), ProtocolError> {
        let mut state = self.lock();
        match state.in_flight.get_mut(&id) {
            Some(slot) if !slot.sealed => {
                slot.manual_retry = true;
                Ok(())
            }
            _ => Err(ProtocolError::NotInFlight(id)),
        }
    }

    /// Mark an execution as returned. Yields whether a manual retry was
    /// requested; further retry requests for the job are refused.
    pub fn seal(&self, id: JobId) -> Result<bool, ProtocolError> {
        let mut state = self.lock();
        match state.in_flight.get_mut(&id) {
            Some(slot) if !slot.sealed => {
                slot.sealed = true;
                Ok(slot.manual_retry)
            }
            _ => Err(ProtocolError::DuplicateCompletion(id)),
        }
    }

    /// Free the job's slot, optionally putting it back on the schedule in
    /// the same step.
    pub fn release(&self, id: JobId, requeue: Option<JobRecord>) -> Result<(), ProtocolError> {
        let drained = {
            let mut state = self.lock();
            if state.in_flight.remove(&id).is_none() {
                return Err(ProtocolError::DuplicateCompletion(id));
            }
            if !state.closed {
                if let Some(job) = requeue {
                    insert(&mut state, job, None);
                }
            }
            state.drained()
        };
        self.wake.notify_one();
        if drained {
            self.events.emit(EventKind::Drain);
        }
        Ok(())
    }

    /// Stop dispatching. Returns true if the state changed.
    pub fn pause(&self) -> bool {
        let mut state = self.lock();
        !std::mem::replace(&mut state.paused, true)
    }

    /// Start dispatching. Returns true if the state changed.
    pub fn resume(&self) -> bool {
        let changed = {
            let mut state = self.lock();
            std::mem::replace(&mut state.paused, false)
        };
        if changed {
            self.wake.notify_one();
        }
        changed
    }

    /// Permanently stop. The dispatch loop exits on its next wake-up.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.paused = true;
        }
        self.wake.notify_one();
    }

    /// Jobs not yet dispatched, including early jobs in backoff.
    pub fn pending(&self) -> usize {
        let state = self.lock();
        state.pending.len() + state.deferred
    }

    /// Jobs currently occupying a slot.
    pub fn running(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Wait for any state change. A notification sent while nobody waits is
    /// kept, so a change between the last `next` and this call is not lost.
    pub async fn changed(&self) {
        self.wake.notified().await;
    }
}

fn insert(state: &mut State, job: JobRecord, not_before: Option<DateTime<Utc>>) {
    let seq = state.next_seq;
    state.next_seq += 1;
    state.pending.push(Entry {
        job,
        not_before,
        seq,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventName;
    use chrono::Duration;
    use std::path::Path;
    use std::sync::Arc;

    fn job(due_at: DateTime<Utc>) -> JobRecord {
        JobRecord::new(Path::new("/q"), serde_json::Value::Null, due_at, false)
    }

    fn ready(next: Option<Next>) -> JobRecord {
        match next {
            Some(Next::Ready(job)) => job,
            other => panic!("expected ready job, got {other:?}"),
        }
    }

    fn running(concurrency: usize) -> Scheduler {
        let scheduler = Scheduler::new(concurrency, Emitter::new());
        scheduler.resume();
        scheduler
    }

    #[test]
    fn starts_paused() {
        let scheduler = Scheduler::new(1, Emitter::new());
        scheduler.push(job(Utc::now()), None);
        assert!(scheduler.next(Utc::now()).is_none());
        assert!(scheduler.resume());
        assert!(!scheduler.resume());
        assert!(scheduler.next(Utc::now()).is_some());
    }

    #[test]
    fn earliest_due_time_first_with_stable_ties() {
        let scheduler = running(10);
        let now = Utc::now();
        let late = job(now - Duration::seconds(1));
        let first_tie = job(now - Duration::seconds(5));
        let second_tie = job(now - Duration::seconds(5));
        let ids = [first_tie.id, second_tie.id, late.id];

        scheduler.push(late, None);
        scheduler.push(first_tie, None);
        scheduler.push(second_tie, None);

        let order: Vec<_> = (0..3).map(|_| ready(scheduler.next(now)).id).collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn dispatch_increments_attempts_and_marks_processing() {
        let scheduler = running(1);
        scheduler.push(job(Utc::now()), None);
        let job = ready(scheduler.next(Utc::now()));
        assert_eq!(job.attempts, 1);
        assert!(job.processing);
    }

    #[test]
    fn early_jobs_are_deferred_without_an_attempt() {
        let scheduler = running(1);
        let now = Utc::now();
        scheduler.push(job(now + Duration::seconds(60)), None);

        let entry = match scheduler.next(now) {
            Some(Next::Early(entry)) => entry,
            other => panic!("expected early job, got {other:?}"),
        };
        assert_eq!(entry.job.attempts, 0);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.running(), 0);

        scheduler.requeue_deferred(entry);
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn push_floor_delays_eligibility_but_not_order() {
        let scheduler = running(2);
        let now = Utc::now();
        let floor = now + Duration::milliseconds(50);
        let oldest = job(now - Duration::seconds(30));
        let newer = job(now - Duration::seconds(10));
        let (oldest_id, newer_id) = (oldest.id, newer.id);
        let oldest_due = oldest.due_at;

        scheduler.push(newer, Some(floor));
        scheduler.push(oldest, Some(floor));

        // Both overdue, but neither is eligible before the floor.
        let first = match scheduler.next(now) {
            Some(Next::Early(entry)) => entry,
            other => panic!("expected early job, got {other:?}"),
        };
        assert_eq!(first.job.id, oldest_id);
        scheduler.requeue_deferred(first);
        let second = match scheduler.next(now) {
            Some(Next::Early(entry)) => entry,
            other => panic!("expected early job, got {other:?}"),
        };
        scheduler.requeue_deferred(second);

        let later = floor + Duration::milliseconds(1);
        let a = ready(scheduler.next(later));
        let b = ready(scheduler.next(later));
        assert_eq!((a.id, b.id), (oldest_id, newer_id));
        assert_eq!(a.due_at, oldest_due);
    }

    #[test]
    fn never_exceeds_concurrency() {
        let scheduler = running(2);
        for _ in 0..5 {
            scheduler.push(job(Utc::now()), None);
        }
        let a = ready(scheduler.next(Utc::now()));
        let _b = ready(scheduler.next(Utc::now()));
        assert!(scheduler.next(Utc::now()).is_none());
        assert_eq!(scheduler.running(), 2);

        scheduler.seal(a.id).unwrap();
        scheduler.release(a.id, None).unwrap();
        assert!(scheduler.next(Utc::now()).is_some());
    }

    #[test]
    fn double_completion_is_a_protocol_error() {
        let scheduler = running(1);
        scheduler.push(job(Utc::now()), None);
        let job = ready(scheduler.next(Utc::now()));

        assert_eq!(scheduler.seal(job.id), Ok(false));
        assert_eq!(
            scheduler.seal(job.id),
            Err(ProtocolError::DuplicateCompletion(job.id))
        );
        scheduler.release(job.id, None).unwrap();
        assert_eq!(
            scheduler.release(job.id, None),
            Err(ProtocolError::DuplicateCompletion(job.id))
        );
    }

    #[test]
    fn manual_retry_requires_in_flight_job() {
        let scheduler = running(1);
        let pending = job(Utc::now());
        let id = pending.id;
        assert_eq!(
            scheduler.request_retry(id),
            Err(ProtocolError::NotInFlight(id))
        );

        scheduler.push(pending, None);
        ready(scheduler.next(Utc::now()));
        scheduler.request_retry(id).unwrap();
        assert_eq!(scheduler.seal(id), Ok(true));
        assert_eq!(
            scheduler.request_retry(id),
            Err(ProtocolError::NotInFlight(id))
        );
    }

    #[test]
    fn emits_saturated_empty_and_drain() {
        let events = Emitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        events.on_any(move |e| sink.lock().unwrap().push(e.kind.name()));

        let scheduler = Scheduler::new(1, events);
        scheduler.resume();
        scheduler.push(job(Utc::now()), None);
        let job = ready(scheduler.next(Utc::now()));
        scheduler.seal(job.id).unwrap();
        scheduler.release(job.id, None).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![EventName::Empty, EventName::Saturated, EventName::Drain]
        );
    }

    #[test]
    fn closed_scheduler_refuses_work() {
        let scheduler = running(1);
        scheduler.close();
        assert!(!scheduler.push(job(Utc::now()), None));
        assert!(scheduler.next(Utc::now()).is_none());
        assert!(scheduler.is_closed());
    }
}
