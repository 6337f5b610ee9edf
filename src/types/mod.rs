pub mod events;
pub mod ids;
pub mod job;
pub mod options;
pub mod stats;

pub use events::JobEvent;
pub use ids::JobId;
pub use job::{BackoffStrategy, Job, JobStatus, Priority};
pub use options::EnqueueOptions;
pub use stats::{QueueCounts, QueueStats, WorkerStats};
