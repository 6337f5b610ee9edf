//! # jobflow: durable priority job queue
//!
//! A queue engine for background work: priority-ordered dequeue with FIFO
//! tie-break, delayed execution backed by a durable delayed set, bounded
//! concurrency worker pools with per-attempt deadlines, and exponential /
//! linear / fixed retry backoff.
//!
//! ## Design
//!
//! - **One synchronization point**: pools share a [`QueueStore`]; its
//!   `dequeue_next` is a single atomic pop, so no job is ever claimed twice.
//! - **Explicit lifecycle**: [`JobEngine`] is constructed with an injected
//!   store and started/stopped explicitly; there is no global queue.
//! - **Durable delay**: the delayed set in the store is the source of truth
//!   for deferred jobs; the promoter is an idempotent periodic scan.
//! - **Per-attempt deadlines**: each attempt races a timeout; an attempt
//!   that exceeds its deadline is abandoned and consumes one retry. Work a
//!   handler spawned onto its own task is beyond the pool's reach.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use jobflow::prelude::*;
//! use serde_json::{json, Value};
//!
//! struct SendEmail;
//!
//! #[async_trait]
//! impl Processor for SendEmail {
//!     fn job_type(&self) -> &str {
//!         "send_email"
//!     }
//!
//!     async fn execute(&self, ctx: &ProcessContext) -> Result<Value, ProcessError> {
//!         let to: String = ctx.payload_as()?;
//!         ctx.set_progress(50).await;
//!         // ... deliver ...
//!         Ok(json!({ "delivered_to": to }))
//!     }
//! }
//!
//! # async fn demo() -> QueueResult<()> {
//! let engine = JobEngine::new(Arc::new(MemoryStore::new()));
//! engine.register_processor(Arc::new(SendEmail))?;
//! engine.start();
//! engine.start_worker("mailer", 4)?;
//!
//! let job = engine
//!     .enqueue("send_email", json!("ops@example.com"), EnqueueOptions::default())
//!     .await?;
//! let _status = engine.get_job(&job.id).await?;
//!
//! engine.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod retry;
pub mod store;
pub mod types;
pub mod worker;

pub use config::QueueConfig;
pub use engine::JobEngine;
pub use error::{ExecuteError, ProcessError, QueueError, QueueResult};
pub use registry::{FnProcessor, ProcessContext, Processor, ProcessorFuture, ProcessorRegistry};
pub use retry::{RetryManager, RetryPolicy};
pub use store::{memory::MemoryStore, BoxStream, QueueStore};
pub use types::{
    BackoffStrategy, EnqueueOptions, Job, JobEvent, JobId, JobStatus, Priority, QueueCounts,
    QueueStats, WorkerStats,
};
pub use worker::{WorkerHandle, WorkerPool};

/// Common imports for defining and running jobs
pub mod prelude {
    pub use crate::{
        BackoffStrategy, EnqueueOptions, Job, JobEngine, JobId, JobStatus, MemoryStore, Priority,
        ProcessContext, ProcessError, Processor, ProcessorRegistry, QueueConfig, QueueError,
        QueueResult, QueueStats, QueueStore,
    };
    pub use async_trait::async_trait;
}
