use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobId;

/// Minimal stable event protocol for structured observability
///
/// The store broadcasts one event per lifecycle transition; subscribers get a
/// best-effort stream (lagging receivers drop events, they are never load
/// bearing for correctness).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    /// Job entered the pending or delayed set
    Enqueued {
        job_id: JobId,
        job_type: String,
        at: DateTime<Utc>,
    },

    /// Delay elapsed; job moved from the delayed set into pending
    Promoted { job_id: JobId, at: DateTime<Utc> },

    /// A worker claimed the job out of the pending set
    Claimed { job_id: JobId, at: DateTime<Utc> },

    /// Attempt failed with retries remaining; parked until `execute_at`
    Retrying {
        job_id: JobId,
        execute_at: DateTime<Utc>,
        error: String,
        at: DateTime<Utc>,
    },

    /// Job completed successfully
    Completed { job_id: JobId, at: DateTime<Utc> },

    /// Job failed permanently
    Failed {
        job_id: JobId,
        error: String,
        at: DateTime<Utc>,
    },

    /// Job was cancelled before any worker claimed it
    Cancelled { job_id: JobId, at: DateTime<Utc> },
}

impl JobEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Promoted { .. } => "promoted",
            Self::Claimed { .. } => "claimed",
            Self::Retrying { .. } => "retrying",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// Get the job ID from any event
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Enqueued { job_id, .. }
            | Self::Promoted { job_id, .. }
            | Self::Claimed { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::Cancelled { job_id, .. } => job_id,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Enqueued { at, .. }
            | Self::Promoted { at, .. }
            | Self::Claimed { at, .. }
            | Self::Retrying { at, .. }
            | Self::Completed { at, .. }
            | Self::Failed { at, .. }
            | Self::Cancelled { at, .. } => at,
        }
    }
}
