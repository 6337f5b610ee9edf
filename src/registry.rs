use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{ProcessError, QueueError, QueueResult};
use crate::store::QueueStore;
use crate::types::{Job, JobId};

/// Execution-time view of a job handed to a processor
///
/// Carries a snapshot of the job plus a store handle so the handler can
/// report best-effort progress. Progress is advisory only; the worker, not
/// the handler, owns the job's lifecycle.
pub struct ProcessContext {
    job: Job,
    store: Arc<dyn QueueStore>,
}

impl ProcessContext {
    pub fn new(job: Job, store: Arc<dyn QueueStore>) -> Self {
        Self { job, store }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn job_id(&self) -> &JobId {
        &self.job.id
    }

    pub fn payload(&self) -> &Value {
        &self.job.payload
    }

    /// Deserialize the payload into a concrete type
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProcessError> {
        serde_json::from_value(self.job.payload.clone())
            .map_err(|e| ProcessError::new(format!("payload deserialization failed: {e}")))
    }

    /// Report completion percentage (clamped to 100); failures to persist
    /// are swallowed because progress is never authoritative. A report that
    /// arrives after this attempt was retired (timed out, retried, or
    /// finalized) is ignored by the store.
    pub async fn set_progress(&self, progress: u8) {
        match self.store.update_progress(&self.job.id, progress).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %self.job.id, "progress report ignored, attempt superseded")
            }
            Err(err) => debug!(job_id = %self.job.id, "progress update dropped: {err}"),
        }
    }
}

/// Caller-supplied handler bound to one job type
///
/// The capability contract of the whole engine: `execute` returns the job's
/// result value or a `ProcessError` that consumes an attempt.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Job type this processor handles; the registry dispatch key
    fn job_type(&self) -> &str;

    /// Execute one attempt of a job
    async fn execute(&self, ctx: &ProcessContext) -> Result<Value, ProcessError>;
}

/// Boxed future returned by closure-based processors
pub type ProcessorFuture = Pin<Box<dyn Future<Output = Result<Value, ProcessError>> + Send>>;

/// Adapter turning an async closure into a `Processor`
///
/// Convenient for tests and small inline handlers.
pub struct FnProcessor<F> {
    job_type: String,
    handler: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(&ProcessContext) -> ProcessorFuture + Send + Sync,
{
    pub fn new(job_type: impl Into<String>, handler: F) -> Self {
        Self {
            job_type: job_type.into(),
            handler,
        }
    }
}

#[async_trait]
impl<F> Processor for FnProcessor<F>
where
    F: Fn(&ProcessContext) -> ProcessorFuture + Send + Sync,
{
    fn job_type(&self) -> &str {
        &self.job_type
    }

    async fn execute(&self, ctx: &ProcessContext) -> Result<Value, ProcessError> {
        (self.handler)(ctx).await
    }
}

/// Registry mapping job-type strings to processors
///
/// Registration is checked at startup: re-registering an existing type is
/// rejected rather than silently replaced, so a typo never shadows a
/// production handler.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor for its job type
    pub fn register(&mut self, processor: Arc<dyn Processor>) -> QueueResult<()> {
        let job_type = processor.job_type().to_string();
        if self.processors.contains_key(&job_type) {
            return Err(QueueError::ProcessorExists(job_type));
        }
        debug!(job_type = %job_type, "registered processor");
        self.processors.insert(job_type, processor);
        Ok(())
    }

    /// Resolve the processor for a job type, if one is registered
    pub fn resolve(&self, job_type: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(job_type).cloned()
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.processors.contains_key(job_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.processors.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::types::EnqueueOptions;
    use serde_json::json;

    struct EchoProcessor;

    #[async_trait]
    impl Processor for EchoProcessor {
        fn job_type(&self) -> &str {
            "echo"
        }

        async fn execute(&self, ctx: &ProcessContext) -> Result<Value, ProcessError> {
            Ok(ctx.payload().clone())
        }
    }

    fn context_for(payload: Value) -> ProcessContext {
        let job = Job::new("echo", payload, EnqueueOptions::default()).unwrap();
        ProcessContext::new(job, Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn resolve_and_execute() {
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(EchoProcessor)).unwrap();

        let processor = registry.resolve("echo").expect("registered");
        let ctx = context_for(json!({"k": "v"}));
        let result = processor.execute(&ctx).await.unwrap();
        assert_eq!(result, json!({"k": "v"}));
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(EchoProcessor)).unwrap();

        let result = registry.register(Arc::new(EchoProcessor));
        assert!(matches!(result, Err(QueueError::ProcessorExists(t)) if t == "echo"));
    }

    #[tokio::test]
    async fn unknown_type_resolves_to_none() {
        let registry = ProcessorRegistry::new();
        assert!(registry.resolve("missing").is_none());
    }

    #[tokio::test]
    async fn fn_processor_wraps_closure() {
        let processor = FnProcessor::new("double", |ctx: &ProcessContext| {
            let n = ctx.payload().as_i64().unwrap_or(0);
            Box::pin(async move { Ok(json!(n * 2)) }) as ProcessorFuture
        });

        let ctx = context_for(json!(21));
        let result = processor.execute(&ctx).await.unwrap();
        assert_eq!(result, json!(42));
    }

    #[tokio::test]
    async fn progress_updates_are_best_effort() {
        let store = Arc::new(MemoryStore::new());
        let job = Job::new("echo", json!(null), EnqueueOptions::default()).unwrap();
        store.enqueue(job.clone()).await.unwrap();
        let claimed = store.dequeue_next().await.unwrap().unwrap();

        let ctx = ProcessContext::new(claimed, store.clone());
        ctx.set_progress(40).await;

        let stored = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.progress, 40);
    }

    #[tokio::test]
    async fn late_progress_cannot_rewrite_a_retried_job() {
        use crate::error::ExecuteError;
        use crate::retry::{RetryManager, RetryPolicy};
        use crate::types::JobStatus;

        let store = Arc::new(MemoryStore::new());
        let job = Job::new("echo", json!(null), EnqueueOptions::default()).unwrap();
        store.enqueue(job.clone()).await.unwrap();
        let claimed = store.dequeue_next().await.unwrap().unwrap();

        // The handler holds its context while the attempt times out and the
        // job is rescheduled.
        let ctx = ProcessContext::new(claimed.clone(), store.clone());
        let retry = RetryManager::new(store.clone(), RetryPolicy::default());
        retry
            .handle_failure(claimed, ExecuteError::Timeout(50))
            .await
            .unwrap();

        // The orphaned handler reports progress after the fact
        ctx.set_progress(10).await;

        let stored = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Delayed);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.progress, 0);
    }
}
