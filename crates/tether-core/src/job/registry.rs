//! Tracking of requests awaiting a correlated reply.

use super::id::{JobId, JobIdGenerator};
use crate::event::{Event, EventKind};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// A request issued by this process that has not been answered yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutstandingJob {
    job_id: JobId,
    expected: EventKind,
    created_at: Instant,
}

impl OutstandingJob {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Event kind the reply is expected to arrive as.
    pub fn expected(&self) -> EventKind {
        self.expected
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Allocates job ids and remembers which ones are still in flight.
///
/// Safe to share between the task issuing requests and the dispatch loop.
/// Entries live until they are matched by [`claim`](Self::claim), released
/// with [`complete`](Self::complete) or swept by
/// [`expire_older_than`](Self::expire_older_than).
#[derive(Debug, Default)]
pub struct JobRegistry {
    ids: JobIdGenerator,
    outstanding: Mutex<HashMap<JobId, OutstandingJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry drawing ids from a specific generator.
    pub fn with_generator(ids: JobIdGenerator) -> Self {
        Self {
            ids,
            outstanding: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, OutstandingJob>> {
        self.outstanding
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate a fresh id and start tracking it.
    pub fn new_job(&self, expected: EventKind) -> JobId {
        let job_id = self.ids.next_id();
        let job = OutstandingJob {
            job_id,
            expected,
            created_at: Instant::now(),
        };
        self.lock().insert(job_id, job);
        debug!("Tracking job {} expecting {}", job_id, expected);
        job_id
    }

    /// Look up the outstanding job an event answers, without releasing it.
    pub fn match_event(&self, event: &Event) -> Option<OutstandingJob> {
        let job_id = event.job_id().filter(|id| id.is_valid())?;
        self.lock().get(&job_id).cloned()
    }

    /// Stop tracking a job. Returns `false` if it was not tracked.
    pub fn complete(&self, job_id: JobId) -> bool {
        self.lock().remove(&job_id).is_some()
    }

    /// Match an event and release its job in one step.
    ///
    /// Two callers racing on events with the same id see at most one `Some`.
    pub fn claim(&self, event: &Event) -> Option<OutstandingJob> {
        let job_id = event.job_id().filter(|id| id.is_valid())?;
        let claimed = self.lock().remove(&job_id);
        if let Some(job) = &claimed {
            debug!(
                "Job {} answered by {} after {:?}",
                job_id,
                event.kind(),
                job.age()
            );
        }
        claimed
    }

    pub fn is_outstanding(&self, job_id: JobId) -> bool {
        self.lock().contains_key(&job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Release every job created at least `age` ago and return them.
    pub fn expire_older_than(&self, age: Duration) -> Vec<OutstandingJob> {
        let now = Instant::now();
        let mut outstanding = self.lock();
        let stale: Vec<JobId> = outstanding
            .values()
            .filter(|job| now.saturating_duration_since(job.created_at) >= age)
            .map(|job| job.job_id)
            .collect();

        let mut expired: Vec<OutstandingJob> = stale
            .into_iter()
            .filter_map(|id| outstanding.remove(&id))
            .collect();
        expired.sort_by_key(|job| job.created_at);

        if !expired.is_empty() {
            debug!("Expired {} outstanding jobs", expired.len());
        }
        expired
    }
}
