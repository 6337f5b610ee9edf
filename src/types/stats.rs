use serde::{Deserialize, Serialize};

/// Per-set totals reported by the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub delayed: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Snapshot of one worker pool's throughput
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub name: String,
    pub concurrency: usize,
    pub active_jobs: usize,
    pub processed_jobs: u64,
    pub failed_jobs: u64,
    pub running: bool,
}

/// Aggregate introspection view: store counts plus per-pool throughput
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub delayed: usize,
    pub completed: usize,
    pub failed: usize,
    pub workers: Vec<WorkerStats>,
}

impl QueueStats {
    pub fn from_counts(counts: QueueCounts, workers: Vec<WorkerStats>) -> Self {
        Self {
            pending: counts.pending,
            delayed: counts.delayed,
            completed: counts.completed,
            failed: counts.failed,
            workers,
        }
    }
}
