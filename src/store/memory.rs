use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::{QueueError, QueueResult};
use crate::store::{BoxStream, QueueStore};
use crate::types::{Job, JobEvent, JobId, JobStatus, QueueCounts};

/// Default bound on each archive when none is configured
pub const DEFAULT_ARCHIVE_LIMIT: usize = 1_000;

/// Sorted-set state behind one lock; every multi-step transition happens
/// under it, which is what makes `dequeue_next` an atomic pop.
#[derive(Default)]
struct StoreState {
    /// Authoritative job records indexed by id
    jobs: HashMap<JobId, Job>,

    /// Pending set: (priority rank, insertion seq) -> job id
    pending: BTreeMap<(u8, u64), JobId>,

    /// Delayed set: (execute_at, insertion seq) -> job id
    delayed: BTreeMap<(DateTime<Utc>, u64), JobId>,

    /// Completed archive, oldest first
    completed: VecDeque<JobId>,

    /// Failed archive, oldest first
    failed: VecDeque<JobId>,
}

impl StoreState {
    /// Drop a job id from whichever index set references it
    fn remove_from_sets(&mut self, id: &JobId) {
        self.pending.retain(|_, job_id| job_id != id);
        self.delayed.retain(|_, job_id| job_id != id);
    }
}

/// In-memory queue store with sorted-set semantics
///
/// The reference implementation of `QueueStore`: a `BTreeMap` keyed by
/// `(priority, seq)` plays the pending sorted set and one keyed by
/// `(execute_at, seq)` plays the delayed set, so pop-minimum and the
/// promotion scan are ordinary first-entry operations.
pub struct MemoryStore {
    state: Mutex<StoreState>,

    /// Monotone insertion counter; the FIFO tie-break within a priority
    seq: AtomicU64,

    archive_limit: usize,

    event_broadcaster: broadcast::Sender<JobEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_archive_limit(DEFAULT_ARCHIVE_LIMIT)
    }

    pub fn with_archive_limit(archive_limit: usize) -> Self {
        let (event_broadcaster, _) = broadcast::channel(1024);
        Self {
            state: Mutex::new(StoreState::default()),
            seq: AtomicU64::new(0),
            archive_limit,
            event_broadcaster,
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, event: JobEvent) {
        // Subscribers are optional; a closed channel is not an error
        let _ = self.event_broadcaster.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(&self, job: Job) -> QueueResult<()> {
        let id = job.id.clone();
        let job_type = job.job_type.clone();
        {
            let mut state = self.state.lock();
            match (job.status, job.execute_at) {
                (JobStatus::Delayed, Some(execute_at)) => {
                    state.delayed.insert((execute_at, self.next_seq()), id.clone());
                }
                (JobStatus::Pending, _) => {
                    state
                        .pending
                        .insert((job.priority.rank(), self.next_seq()), id.clone());
                }
                (status, _) => {
                    return Err(QueueError::Internal(format!(
                        "cannot enqueue job in status {status}"
                    )));
                }
            }
            state.jobs.insert(id.clone(), job);
        }

        self.emit(JobEvent::Enqueued {
            job_id: id,
            job_type,
            at: Utc::now(),
        });
        Ok(())
    }

    async fn dequeue_next(&self) -> QueueResult<Option<Job>> {
        let claimed = {
            let mut state = self.state.lock();
            // Single atomic pop-minimum: remove the entry and flip the record
            // to Active before anything else can observe it.
            match state.pending.pop_first() {
                Some((_, id)) => {
                    let job = state
                        .jobs
                        .get_mut(&id)
                        .ok_or_else(|| QueueError::Internal(format!("pending set referenced missing job {id}")))?;
                    job.claim();
                    Some(job.clone())
                }
                None => None,
            }
        };

        if let Some(ref job) = claimed {
            self.emit(JobEvent::Claimed {
                job_id: job.id.clone(),
                at: Utc::now(),
            });
        }
        Ok(claimed)
    }

    async fn promote_delayed(&self, now: DateTime<Utc>) -> QueueResult<usize> {
        let promoted: Vec<JobId> = {
            let mut state = self.state.lock();
            let due: Vec<((DateTime<Utc>, u64), JobId)> = state
                .delayed
                .range(..=(now, u64::MAX))
                .map(|(key, id)| (*key, id.clone()))
                .collect();

            let mut moved = Vec::with_capacity(due.len());
            for (key, id) in due {
                state.delayed.remove(&key);
                let rank = match state.jobs.get_mut(&id) {
                    Some(job) => {
                        job.promote();
                        job.priority.rank()
                    }
                    // Stale index entry; nothing to promote
                    None => continue,
                };
                state.pending.insert((rank, self.next_seq()), id.clone());
                moved.push(id);
            }
            moved
        };

        let count = promoted.len();
        for job_id in promoted {
            self.emit(JobEvent::Promoted {
                job_id,
                at: Utc::now(),
            });
        }
        Ok(count)
    }

    async fn reschedule(&self, job: Job) -> QueueResult<()> {
        let execute_at = job.execute_at.ok_or_else(|| {
            QueueError::Internal(format!("rescheduled job {} has no execute_at", job.id))
        })?;
        let id = job.id.clone();
        let error = job.error.clone().unwrap_or_default();
        {
            let mut state = self.state.lock();
            state.delayed.insert((execute_at, self.next_seq()), id.clone());
            state.jobs.insert(id.clone(), job);
        }

        self.emit(JobEvent::Retrying {
            job_id: id,
            execute_at,
            error,
            at: Utc::now(),
        });
        Ok(())
    }

    async fn archive(&self, job: Job) -> QueueResult<()> {
        let id = job.id.clone();
        let status = job.status;
        let error = job.error.clone();
        {
            let mut state = self.state.lock();
            let archive = match status {
                JobStatus::Completed => &mut state.completed,
                JobStatus::Failed => &mut state.failed,
                other => {
                    return Err(QueueError::Internal(format!(
                        "cannot archive job in status {other}"
                    )));
                }
            };
            archive.push_back(id.clone());
            // Trim to the bounded archive size, oldest evicted first
            let evicted = if archive.len() > self.archive_limit {
                archive.pop_front()
            } else {
                None
            };
            state.jobs.insert(id.clone(), job);
            if let Some(old) = evicted {
                state.jobs.remove(&old);
            }
        }

        match status {
            JobStatus::Completed => self.emit(JobEvent::Completed {
                job_id: id,
                at: Utc::now(),
            }),
            JobStatus::Failed => self.emit(JobEvent::Failed {
                job_id: id,
                error: error.unwrap_or_default(),
                at: Utc::now(),
            }),
            _ => unreachable!("validated above"),
        }
        Ok(())
    }

    async fn cancel(&self, id: &JobId) -> QueueResult<bool> {
        let cancelled = {
            let mut state = self.state.lock();
            let job = state
                .jobs
                .get_mut(id)
                .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;
            if !job.status.is_cancellable() {
                // Active or terminal: the store does not own in-flight work
                return Ok(false);
            }
            job.cancel();
            state.remove_from_sets(id);
            true
        };

        if cancelled {
            self.emit(JobEvent::Cancelled {
                job_id: id.clone(),
                at: Utc::now(),
            });
        }
        Ok(cancelled)
    }

    async fn get_job(&self, id: &JobId) -> QueueResult<Option<Job>> {
        Ok(self.state.lock().jobs.get(id).cloned())
    }

    async fn update_progress(&self, id: &JobId, progress: u8) -> QueueResult<bool> {
        let mut state = self.state.lock();
        match state.jobs.get_mut(id) {
            // Only a live attempt may report progress; anything else is a
            // stale write from a superseded attempt.
            Some(job) if job.status == JobStatus::Active => {
                job.set_progress(progress);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(QueueError::JobNotFound(id.to_string())),
        }
    }

    async fn counts(&self) -> QueueResult<QueueCounts> {
        let state = self.state.lock();
        Ok(QueueCounts {
            pending: state.pending.len(),
            delayed: state.delayed.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
        })
    }

    fn event_stream(&self) -> BoxStream<JobEvent> {
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        let receiver = self.event_broadcaster.subscribe();
        Box::pin(BroadcastStream::new(receiver).filter_map(|result| result.ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EnqueueOptions;
    use chrono::Duration;
    use serde_json::json;

    fn job_with_priority(rank: u8) -> Job {
        let options = EnqueueOptions::default().priority_rank(rank).unwrap();
        Job::new("test_job", json!({}), options).unwrap()
    }

    fn delayed_job(delay_ms: u64) -> Job {
        let options = EnqueueOptions::default().delay_ms(delay_ms);
        Job::new("test_job", json!({}), options).unwrap()
    }

    #[tokio::test]
    async fn dequeue_orders_by_priority_then_fifo() {
        let store = MemoryStore::new();
        let mid = job_with_priority(5);
        let high = job_with_priority(1);
        let low = job_with_priority(10);
        let mid_second = job_with_priority(5);

        for job in [&mid, &high, &low, &mid_second] {
            store.enqueue((*job).clone()).await.unwrap();
        }

        let order: Vec<JobId> = [
            store.dequeue_next().await.unwrap().unwrap(),
            store.dequeue_next().await.unwrap().unwrap(),
            store.dequeue_next().await.unwrap().unwrap(),
            store.dequeue_next().await.unwrap().unwrap(),
        ]
        .into_iter()
        .map(|job| job.id)
        .collect();

        assert_eq!(order, vec![high.id, mid.id, mid_second.id, low.id]);
        assert!(store.dequeue_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dequeue_marks_job_active() {
        let store = MemoryStore::new();
        let job = job_with_priority(5);
        store.enqueue(job.clone()).await.unwrap();

        let claimed = store.dequeue_next().await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Active);

        let stored = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Active);
    }

    #[tokio::test]
    async fn delayed_jobs_invisible_until_promoted() {
        let store = MemoryStore::new();
        let job = delayed_job(60_000);
        store.enqueue(job.clone()).await.unwrap();

        assert!(store.dequeue_next().await.unwrap().is_none());

        // Not yet due
        let promoted = store.promote_delayed(Utc::now()).await.unwrap();
        assert_eq!(promoted, 0);

        // Past due
        let later = Utc::now() + Duration::milliseconds(61_000);
        let promoted = store.promote_delayed(later).await.unwrap();
        assert_eq!(promoted, 1);

        let claimed = store.dequeue_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
    }

    #[tokio::test]
    async fn promotion_is_idempotent() {
        let store = MemoryStore::new();
        store.enqueue(delayed_job(1)).await.unwrap();

        let later = Utc::now() + Duration::seconds(1);
        assert_eq!(store.promote_delayed(later).await.unwrap(), 1);
        assert_eq!(store.promote_delayed(later).await.unwrap(), 0);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.delayed, 0);
    }

    #[tokio::test]
    async fn cancel_pending_removes_from_set() {
        let store = MemoryStore::new();
        let job = job_with_priority(5);
        store.enqueue(job.clone()).await.unwrap();

        assert!(store.cancel(&job.id).await.unwrap());

        let stored = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert!(store.dequeue_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_active_returns_false() {
        let store = MemoryStore::new();
        let job = job_with_priority(5);
        store.enqueue(job.clone()).await.unwrap();
        store.dequeue_next().await.unwrap().unwrap();

        assert!(!store.cancel(&job.id).await.unwrap());
        let stored = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Active);
    }

    #[tokio::test]
    async fn cancel_unknown_job_errors() {
        let store = MemoryStore::new();
        let result = store.cancel(&JobId::new()).await;
        assert!(matches!(result, Err(QueueError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn archive_trims_oldest() {
        let store = MemoryStore::with_archive_limit(2);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut job = job_with_priority(5);
            store.enqueue(job.clone()).await.unwrap();
            store.dequeue_next().await.unwrap().unwrap();
            job.claim();
            job.complete(json!("ok"));
            ids.push(job.id.clone());
            store.archive(job).await.unwrap();
        }

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.completed, 2);

        // Oldest entry evicted from the record map as well
        assert!(store.get_job(&ids[0]).await.unwrap().is_none());
        assert!(store.get_job(&ids[2]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn progress_only_persists_while_active() {
        let store = MemoryStore::new();
        let job = job_with_priority(5);
        store.enqueue(job.clone()).await.unwrap();

        // Pending: no live attempt to report for
        assert!(!store.update_progress(&job.id, 10).await.unwrap());

        let mut claimed = store.dequeue_next().await.unwrap().unwrap();
        assert!(store.update_progress(&job.id, 50).await.unwrap());
        assert_eq!(store.get_job(&job.id).await.unwrap().unwrap().progress, 50);

        claimed.complete(json!("ok"));
        store.archive(claimed).await.unwrap();
        assert!(!store.update_progress(&job.id, 75).await.unwrap());
        assert_eq!(store.get_job(&job.id).await.unwrap().unwrap().progress, 100);

        let result = store.update_progress(&JobId::new(), 10).await;
        assert!(matches!(result, Err(QueueError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn concurrent_dequeue_never_duplicates() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        const TOTAL: usize = 200;
        for _ in 0..TOTAL {
            store.enqueue(job_with_priority(5)).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(job) = store.dequeue_next().await.unwrap() {
                    claimed.push(job.id);
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }

        let unique: HashSet<_> = all.iter().cloned().collect();
        assert_eq!(all.len(), TOTAL);
        assert_eq!(unique.len(), TOTAL);
    }
}
