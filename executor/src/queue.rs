//! The in-memory job queue: priority-then-scheduled ordering across jobs,
//! with at-most-one-in-flight enforced per [`JobKey`] (§4.2 "within a single
//! rule, at most one firing in flight").
//!
//! Grounded on the teacher's per-pair routing (`PairExecutorRouter`): there,
//! isolation came from a dedicated channel per trading pair. Here the same
//! isolation is expressed as a key a worker must hold exclusively rather
//! than a dedicated channel, so unrelated keys still share one global
//! priority-ordered backlog.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use corelib::{JobId, ListingPostId, RuleId, SyncJobId};
use tokio::sync::Notify;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobKey {
    Rule(RuleId),
    SyncTarget(ListingPostId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
}

#[derive(Clone, Debug)]
pub enum JobPayload {
    RuleFiring {
        firing: scheduler::Firing,
    },
    SyncDelist {
        sync_job_id: SyncJobId,
        listing_post_id: ListingPostId,
        marketplace: String,
        external_id: String,
    },
}

#[derive(Clone, Debug)]
pub struct Job {
    pub id: JobId,
    pub key: JobKey,
    pub priority: Priority,
    pub scheduled_for: DateTime<Utc>,
    pub attempt_number: u32,
    pub history: Vec<corelib::RetryHistoryEntry>,
    pub payload: JobPayload,
}

impl Job {
    pub fn new_rule_firing(firing: scheduler::Firing) -> Self {
        Self {
            id: JobId::new_v4(),
            key: JobKey::Rule(firing.rule_id),
            priority: Priority::Normal,
            scheduled_for: firing.scheduled_for,
            attempt_number: 1,
            history: Vec::new(),
            payload: JobPayload::RuleFiring { firing },
        }
    }

    pub fn new_sync_delist(
        sync_job_id: SyncJobId,
        listing_post_id: ListingPostId,
        marketplace: String,
        external_id: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new_v4(),
            key: JobKey::SyncTarget(listing_post_id),
            priority: Priority::High,
            scheduled_for: now,
            attempt_number: 1,
            history: Vec::new(),
            payload: JobPayload::SyncDelist {
                sync_job_id,
                listing_post_id,
                marketplace,
                external_id,
            },
        }
    }

    fn retry(mut self, scheduled_for: DateTime<Utc>, history: Vec<corelib::RetryHistoryEntry>) -> Self {
        self.attempt_number += 1;
        self.scheduled_for = scheduled_for;
        self.history = history;
        self
    }
}

#[derive(Default)]
struct Inner {
    pending: Vec<Job>,
    in_flight: HashSet<JobKey>,
    paused: bool,
}

/// A single global backlog. `submit` never blocks; `checkout` is how a
/// worker claims the next eligible job.
pub struct JobQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }

    pub fn submit(&self, job: Job) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending.push(job);
        drop(inner);
        self.notify.notify_one();
    }

    pub fn requeue(&self, job: Job, scheduled_for: DateTime<Utc>, history: Vec<corelib::RetryHistoryEntry>) {
        self.submit(job.retry(scheduled_for, history));
    }

    /// Reschedules a job without advancing its attempt count or retry
    /// history. Used when a failure is rejected by an admission check (e.g.
    /// an open circuit breaker) rather than by the marketplace itself — that
    /// doesn't consume the job's own retry budget (§7).
    pub fn requeue_at_admission_retry(&self, mut job: Job, scheduled_for: DateTime<Utc>) {
        job.scheduled_for = scheduled_for;
        self.submit(job);
    }

    /// Blocks until a job whose key is not currently in flight, and whose
    /// `scheduled_for` has passed, becomes available; then claims it.
    ///
    /// A future-scheduled retry has no other event to wake it, so alongside
    /// `notify.notified()` we also wait on a timer set to the earliest
    /// not-yet-due `scheduled_for` among eligible pending jobs (§9: explicit
    /// timer queues keyed by `(next_run_at, job_id)`, no busy-wait).
    pub async fn checkout(&self, now_fn: impl Fn() -> DateTime<Utc>) -> Job {
        loop {
            let wake_at = {
                let mut inner = self.inner.lock().unwrap();
                if !inner.paused {
                    let now = now_fn();
                    if let Some(idx) = pick_index(&inner.pending, &inner.in_flight, now) {
                        let job = inner.pending.remove(idx);
                        inner.in_flight.insert(job.key);
                        return job;
                    }
                    earliest_future_wake(&inner.pending, &inner.in_flight, now)
                } else {
                    None
                }
            };

            match wake_at {
                Some(instant) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(instant) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    pub fn release(&self, key: JobKey) {
        let mut inner = self.inner.lock().unwrap();
        inner.in_flight.remove(&key);
        drop(inner);
        self.notify.notify_one();
    }

    /// Emergency pause (§4.2 "Cancellation"): stops handing out new jobs and
    /// drains pending ones with `status=skipped`.
    pub fn pause_and_drain(&self) -> Vec<Job> {
        let mut inner = self.inner.lock().unwrap();
        inner.paused = true;
        std::mem::take(&mut inner.pending)
    }

    pub fn resume(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.paused = false;
        drop(inner);
        self.notify.notify_waiters();
    }
}

fn pick_index(pending: &[Job], in_flight: &HashSet<JobKey>, now: DateTime<Utc>) -> Option<usize> {
    pending
        .iter()
        .enumerate()
        .filter(|(_, j)| j.scheduled_for <= now && !in_flight.contains(&j.key))
        .max_by(|(_, a), (_, b)| a.priority.cmp(&b.priority).then(b.scheduled_for.cmp(&a.scheduled_for)))
        .map(|(idx, _)| idx)
}

/// The soonest instant at which a currently-ineligible (not yet due) pending
/// job becomes eligible, if any.
fn earliest_future_wake(pending: &[Job], in_flight: &HashSet<JobKey>, now: DateTime<Utc>) -> Option<tokio::time::Instant> {
    pending
        .iter()
        .filter(|j| j.scheduled_for > now && !in_flight.contains(&j.key))
        .map(|j| j.scheduled_for)
        .min()
        .map(|scheduled_for| {
            let wait = (scheduled_for - now).to_std().unwrap_or(std::time::Duration::ZERO);
            tokio::time::Instant::now() + wait
        })
}
