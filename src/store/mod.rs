pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use std::pin::Pin;

use crate::error::QueueResult;
use crate::types::{Job, JobEvent, JobId, QueueCounts};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Durable backing store for the three lifecycle partitions
///
/// Any engine exposing atomic sorted-set primitives (pop-minimum, scored
/// insert, atomic move between sets) can implement this trait; the in-memory
/// implementation ships with the crate. `dequeue_next` is the one operation
/// that must be a single atomic pop rather than read-then-delete: under
/// concurrent pools no job id may ever be claimed twice.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new job into the pending set, or the delayed set when it
    /// carries a future `execute_at`. Never visible in both sets at once.
    async fn enqueue(&self, job: Job) -> QueueResult<()>;

    /// Atomically remove and return the highest-precedence pending job
    /// (lowest priority rank, FIFO within a rank), marking it `Active`.
    async fn dequeue_next(&self) -> QueueResult<Option<Job>>;

    /// Move every delayed entry with `execute_at <= now` into the pending
    /// set. Idempotent; safe to run concurrently with itself. Returns the
    /// number of jobs promoted.
    async fn promote_delayed(&self, now: DateTime<Utc>) -> QueueResult<usize>;

    /// Park a retried job in the delayed set until its `execute_at`.
    async fn reschedule(&self, job: Job) -> QueueResult<()>;

    /// Move a terminal job into the completed or failed archive, trimming
    /// the archive to its bounded size (oldest evicted first).
    async fn archive(&self, job: Job) -> QueueResult<()>;

    /// Remove a job from the pending or delayed set and mark it
    /// `Cancelled`. Returns `false` for jobs that are `Active` or terminal.
    async fn cancel(&self, id: &JobId) -> QueueResult<bool>;

    /// Look up a job regardless of which set currently holds it.
    async fn get_job(&self, id: &JobId) -> QueueResult<Option<Job>>;

    /// Record best-effort progress for a job, only while the stored record
    /// is still `Active`. Returns `false` once the job has moved on, so a
    /// stale report from a superseded attempt never rewrites lifecycle
    /// state.
    async fn update_progress(&self, id: &JobId, progress: u8) -> QueueResult<bool>;

    /// Per-set totals for introspection.
    async fn counts(&self) -> QueueResult<QueueCounts>;

    /// Lifecycle event stream for observability (boxed for stable Rust).
    fn event_stream(&self) -> BoxStream<JobEvent>;
}
