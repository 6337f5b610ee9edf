use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{QueueError, QueueResult};
use crate::types::options::EnqueueOptions;
use crate::types::JobId;

/// Job priority rank: 1 is the highest precedence, 10 the lowest.
///
/// The pending set dequeues in ascending rank order, FIFO within a rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    pub const HIGHEST: Priority = Priority(1);
    pub const LOWEST: Priority = Priority(10);

    /// Validate a raw rank into a priority
    pub fn new(rank: u8) -> QueueResult<Self> {
        if (Self::HIGHEST.0..=Self::LOWEST.0).contains(&rank) {
            Ok(Self(rank))
        } else {
            Err(QueueError::Validation(format!(
                "priority must be between {} and {}, got {}",
                Self::HIGHEST.0,
                Self::LOWEST.0,
                rank
            )))
        }
    }

    /// Get the numeric rank
    pub fn rank(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(5)
    }
}

impl TryFrom<u8> for Priority {
    type Error = QueueError;

    fn try_from(rank: u8) -> QueueResult<Self> {
        Self::new(rank)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delay strategy applied between retry attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Doubling delay, capped at 60s
    #[default]
    Exponential,
    /// Delay grows by a fixed step per attempt
    Linear,
    /// Constant delay between attempts
    Fixed,
}

impl BackoffStrategy {
    pub fn name(self) -> &'static str {
        match self {
            Self::Exponential => "exponential",
            Self::Linear => "linear",
            Self::Fixed => "fixed",
        }
    }
}

/// Job status lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the pending set for a worker to claim it
    Pending,
    /// Claimed by exactly one worker and executing
    Active,
    /// Waiting in the delayed set until `execute_at` elapses
    Delayed,
    /// Processor returned normally; terminal
    Completed,
    /// Out of attempts; terminal
    Failed,
    /// Removed before any worker claimed it; terminal
    Cancelled,
}

impl JobStatus {
    /// Terminal states never transition again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Cancellation only succeeds while no worker owns the job
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::Pending | Self::Delayed)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Delayed => "delayed",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A unit of deferred work: immutable identity plus mutable lifecycle state
///
/// All transitions go through the helper methods below so field coupling
/// (timestamps, terminal outputs, `execute_at`) stays in one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, assigned at creation
    pub id: JobId,

    /// Processor dispatch key
    pub job_type: String,

    /// Opaque payload handed to the processor
    pub payload: Value,

    /// Current lifecycle status
    pub status: JobStatus,

    /// Dequeue precedence, 1 (highest) to 10 (lowest)
    pub priority: Priority,

    /// Failures consumed so far; never exceeds `max_attempts`
    pub attempts: u32,

    /// Total execution attempts allowed (>= 1)
    pub max_attempts: u32,

    /// Retry delay strategy
    pub backoff: BackoffStrategy,

    /// Hard execution deadline per attempt, in milliseconds
    pub timeout_ms: u64,

    /// Initial delay requested at enqueue time, in milliseconds
    pub delay_ms: u64,

    /// When a delayed job becomes eligible; only meaningful while `Delayed`
    pub execute_at: Option<DateTime<Utc>>,

    /// Best-effort completion percentage reported by the processor (0-100)
    pub progress: u8,

    /// Terminal output on success; mutually exclusive with `error`
    pub result: Option<Value>,

    /// Terminal or last-attempt error; mutually exclusive with `result`
    pub error: Option<String>,

    /// When the job was created
    pub created_at: DateTime<Utc>,

    /// When the job was last updated
    pub updated_at: DateTime<Utc>,

    /// Caller-defined tags
    pub metadata: HashMap<String, String>,
}

impl Job {
    /// Create a job from validated enqueue options
    ///
    /// Starts `Delayed` when a positive delay was requested, else `Pending`.
    pub fn new(job_type: impl Into<String>, payload: Value, options: EnqueueOptions) -> QueueResult<Self> {
        let options = options.validate()?;
        let now = Utc::now();
        let (status, execute_at) = if options.delay_ms > 0 {
            // Saturate absurd delays instead of wrapping into the past
            let delay = Duration::milliseconds(i64::try_from(options.delay_ms).unwrap_or(i64::MAX));
            let execute_at = now
                .checked_add_signed(delay)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            (JobStatus::Delayed, Some(execute_at))
        } else {
            (JobStatus::Pending, None)
        };

        Ok(Self {
            id: JobId::new(),
            job_type: job_type.into(),
            payload,
            status,
            priority: options.priority,
            attempts: 0,
            max_attempts: options.max_attempts,
            backoff: options.backoff,
            timeout_ms: options.timeout_ms,
            delay_ms: options.delay_ms,
            execute_at,
            progress: 0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            metadata: options.metadata,
        })
    }

    /// Whether the job may still be retried after another failure
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// A worker claimed the job out of the pending set
    pub fn claim(&mut self) {
        self.status = JobStatus::Active;
        self.execute_at = None;
        self.touch();
    }

    /// The delayed set promoted the job into pending
    pub fn promote(&mut self) {
        self.status = JobStatus::Pending;
        self.execute_at = None;
        self.touch();
    }

    /// Processor returned normally
    pub fn complete(&mut self, result: Value) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.error = None;
        self.touch();
    }

    /// Out of attempts: permanent failure
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.result = None;
        self.touch();
    }

    /// Attempt failed but retries remain; park in the delayed set
    pub fn schedule_retry(&mut self, execute_at: DateTime<Utc>, error: impl Into<String>) {
        self.status = JobStatus::Delayed;
        self.execute_at = Some(execute_at);
        self.error = Some(error.into());
        self.touch();
    }

    /// Removed before any worker claimed it
    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
        self.execute_at = None;
        self.touch();
    }

    /// Record best-effort processor progress, clamped to 100
    pub fn set_progress(&mut self, progress: u8) {
        self.progress = progress.min(100);
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
