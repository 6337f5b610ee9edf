use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, warn};

use crate::error::{ExecuteError, QueueResult};
use crate::store::QueueStore;
use crate::types::{BackoffStrategy, Job};

/// Backoff schedule shared by every pool
///
/// `attempts` below is the number of failures the job has consumed so far,
/// so the first retry of an exponential job waits `base`, the second `2 *
/// base`, doubling up to `cap`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Exponential base and linear step
    pub base: Duration,
    /// Upper bound on exponential delay
    pub cap: Duration,
    /// Constant delay for the fixed strategy
    pub fixed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            cap: Duration::from_millis(60_000),
            fixed: Duration::from_millis(5_000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given failures consumed so far (>= 1)
    pub fn delay_for(&self, strategy: BackoffStrategy, attempts: u32) -> Duration {
        let attempts = attempts.max(1);
        match strategy {
            BackoffStrategy::Exponential => {
                let base_ms = self.base.as_millis() as u64;
                let shifted = base_ms.saturating_mul(1u64.checked_shl(attempts - 1).unwrap_or(u64::MAX));
                Duration::from_millis(shifted.min(self.cap.as_millis() as u64))
            }
            BackoffStrategy::Linear => {
                Duration::from_millis((self.base.as_millis() as u64).saturating_mul(attempts as u64))
            }
            BackoffStrategy::Fixed => self.fixed,
        }
    }
}

/// Single authority for attempt bookkeeping
///
/// Every failed attempt (handler error, timeout, or missing processor) flows
/// through `handle_failure`, which consumes exactly one attempt and either
/// parks the job in the delayed set or finalizes it into the failed archive.
/// No other component ever mutates `attempts`.
pub struct RetryManager {
    store: Arc<dyn QueueStore>,
    policy: RetryPolicy,
}

impl RetryManager {
    pub fn new(store: Arc<dyn QueueStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Consume one attempt and reschedule or finalize
    ///
    /// Returns the job as persisted. The caller passes the claimed (`Active`)
    /// job; the attempt-bound invariant `attempts <= max_attempts` holds on
    /// both paths.
    pub async fn handle_failure(&self, mut job: Job, error: ExecuteError) -> QueueResult<Job> {
        job.attempts += 1;
        debug_assert!(job.attempts <= job.max_attempts);

        if job.has_attempts_left() {
            let delay = self.policy.delay_for(job.backoff, job.attempts);
            let execute_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));
            warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "attempt failed, retrying: {error}"
            );
            job.schedule_retry(execute_at, error.to_string());
            self.store.reschedule(job.clone()).await?;
        } else {
            error!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempts = job.attempts,
                "job failed permanently: {error}"
            );
            job.fail(error.to_string());
            self.store.archive(job.clone()).await?;
        }
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::types::{EnqueueOptions, JobStatus};
    use serde_json::json;

    #[test]
    fn exponential_doubles_and_caps() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=8)
            .map(|n| policy.delay_for(BackoffStrategy::Exponential, n).as_millis() as u64)
            .collect();
        assert_eq!(delays[..4], [1_000, 2_000, 4_000, 8_000]);
        assert_eq!(delays[6], 60_000);
        assert_eq!(delays[7], 60_000);
    }

    #[test]
    fn linear_grows_by_step() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(BackoffStrategy::Linear, 1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(BackoffStrategy::Linear, 3), Duration::from_millis(3_000));
    }

    #[test]
    fn fixed_is_constant() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(BackoffStrategy::Fixed, 1), Duration::from_millis(5_000));
        assert_eq!(policy.delay_for(BackoffStrategy::Fixed, 9), Duration::from_millis(5_000));
    }

    #[test]
    fn zero_attempts_treated_as_first() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(BackoffStrategy::Exponential, 0),
            Duration::from_millis(1_000)
        );
    }

    async fn claimed_job(max_attempts: u32, store: &MemoryStore) -> Job {
        let options = EnqueueOptions::default().max_attempts(max_attempts);
        let job = Job::new("flaky", json!({}), options).unwrap();
        store.enqueue(job).await.unwrap();
        store.dequeue_next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn failure_with_attempts_left_reschedules() {
        let store = Arc::new(MemoryStore::new());
        let manager = RetryManager::new(store.clone(), RetryPolicy::default());
        let job = claimed_job(3, &store).await;

        let updated = manager
            .handle_failure(job, ExecuteError::Handler("boom".into()))
            .await
            .unwrap();

        assert_eq!(updated.attempts, 1);
        assert_eq!(updated.status, JobStatus::Delayed);
        assert!(updated.execute_at.unwrap() > Utc::now());

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.delayed, 1);
        assert_eq!(counts.failed, 0);
    }

    #[tokio::test]
    async fn exhausted_attempts_archive_as_failed() {
        let store = Arc::new(MemoryStore::new());
        let manager = RetryManager::new(store.clone(), RetryPolicy::default());
        let job = claimed_job(1, &store).await;

        let updated = manager
            .handle_failure(job, ExecuteError::Timeout(500))
            .await
            .unwrap();

        assert_eq!(updated.attempts, 1);
        assert_eq!(updated.status, JobStatus::Failed);
        assert!(updated.error.as_deref().unwrap().contains("500ms"));

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.delayed, 0);
    }

    #[tokio::test]
    async fn attempts_never_exceed_max() {
        let store = Arc::new(MemoryStore::new());
        let manager = RetryManager::new(store.clone(), RetryPolicy::default());
        let mut job = claimed_job(3, &store).await;

        for _ in 0..3 {
            job = manager
                .handle_failure(job, ExecuteError::Handler("again".into()))
                .await
                .unwrap();
            assert!(job.attempts <= job.max_attempts);
            if job.status == JobStatus::Delayed {
                // Simulate the worker claiming the retry
                job.claim();
            }
        }
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);
    }
}
