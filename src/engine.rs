use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::registry::{Processor, ProcessorRegistry};
use crate::retry::{RetryManager, RetryPolicy};
use crate::store::{BoxStream, QueueStore};
use crate::types::{EnqueueOptions, Job, JobEvent, JobId, QueueStats};
use crate::worker::{WorkerHandle, WorkerPool};

/// The job engine: one explicitly constructed service object
///
/// Owns the processor registry, retry policy, worker pools, and the
/// delayed-set promoter. The injected store is the sole synchronization
/// point between pools; the engine itself keeps no hidden global state and
/// has an explicit `start`/`stop` lifecycle.
pub struct JobEngine {
    store: Arc<dyn QueueStore>,
    registry: Arc<RwLock<ProcessorRegistry>>,
    retry: Arc<RetryManager>,
    config: QueueConfig,
    workers: Mutex<HashMap<String, WorkerHandle>>,
    promoter: Mutex<Option<PromoterHandle>>,
}

struct PromoterHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl JobEngine {
    /// Create an engine over the given store with default configuration
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self::with_config(store, QueueConfig::default())
    }

    pub fn with_config(store: Arc<dyn QueueStore>, config: QueueConfig) -> Self {
        Self::with_retry_policy(store, config, RetryPolicy::default())
    }

    pub fn with_retry_policy(
        store: Arc<dyn QueueStore>,
        config: QueueConfig,
        policy: RetryPolicy,
    ) -> Self {
        let retry = Arc::new(RetryManager::new(store.clone(), policy));
        Self {
            store,
            registry: Arc::new(RwLock::new(ProcessorRegistry::new())),
            retry,
            config,
            workers: Mutex::new(HashMap::new()),
            promoter: Mutex::new(None),
        }
    }

    /// Start the delayed-set promoter
    ///
    /// The durable delayed set is the sole source of truth for deferred
    /// work: the promoter is a periodic, idempotent scan, never a per-job
    /// timer, so a restart rebuilds scheduling from the store alone.
    pub fn start(&self) {
        let mut promoter = self.promoter.lock();
        if promoter.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let store = self.store.clone();
        let interval = self.config.promote_interval;
        let join_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            info!(interval_ms = interval.as_millis() as u64, "promoter started");
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        match store.promote_delayed(Utc::now()).await {
                            Ok(0) => {}
                            Ok(count) => debug!(count, "promoted delayed jobs"),
                            Err(err) => error!("promotion scan failed: {err}"),
                        }
                    }
                }
            }
            info!("promoter stopped");
        });

        *promoter = Some(PromoterHandle {
            shutdown_tx,
            join_handle,
        });
    }

    /// Stop the promoter and every worker pool, draining in-flight jobs
    pub async fn stop(&self) -> QueueResult<()> {
        let promoter = self.promoter.lock().take();
        if let Some(handle) = promoter {
            let _ = handle.shutdown_tx.send(());
            handle
                .join_handle
                .await
                .map_err(|e| QueueError::Internal(format!("promoter join error: {e}")))?;
        }

        let handles: Vec<WorkerHandle> = {
            let mut workers = self.workers.lock();
            workers.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.shutdown().await?;
        }
        Ok(())
    }

    /// Register a processor; duplicate job types are rejected
    pub fn register_processor(&self, processor: Arc<dyn Processor>) -> QueueResult<()> {
        self.registry.write().register(processor)
    }

    /// Validate options, create the job, and insert it into the store
    ///
    /// Jobs with a positive `delay_ms` land in the delayed set; everything
    /// else goes straight to pending. Validation failures surface here and
    /// no job is ever created for them.
    pub async fn enqueue(
        &self,
        job_type: impl Into<String>,
        payload: Value,
        options: EnqueueOptions,
    ) -> QueueResult<Job> {
        let job = Job::new(job_type, payload, options)?;
        self.store.enqueue(job.clone()).await?;
        debug!(job_id = %job.id, job_type = %job.job_type, status = %job.status, "enqueued job");
        Ok(job)
    }

    /// Look up a job in whichever set currently holds it
    pub async fn get_job(&self, id: &JobId) -> QueueResult<Option<Job>> {
        self.store.get_job(id).await
    }

    /// Best-effort cancellation: only succeeds while the job is still in
    /// the pending or delayed set. Unknown ids report `false`.
    pub async fn cancel_job(&self, id: &JobId) -> QueueResult<bool> {
        match self.store.cancel(id).await {
            Ok(cancelled) => Ok(cancelled),
            Err(QueueError::JobNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Start a named worker pool with the given concurrency limit
    pub fn start_worker(&self, name: impl Into<String>, concurrency: usize) -> QueueResult<()> {
        let name = name.into();
        let mut workers = self.workers.lock();
        if workers.contains_key(&name) {
            return Err(QueueError::WorkerExists(name));
        }

        let pool = WorkerPool::new(
            name.clone(),
            concurrency,
            self.store.clone(),
            self.registry.clone(),
            self.retry.clone(),
            self.config.clone(),
        );
        workers.insert(name, pool.spawn());
        Ok(())
    }

    /// Stop one pool by name, draining its in-flight jobs
    pub async fn stop_worker(&self, name: &str) -> QueueResult<()> {
        let handle = self
            .workers
            .lock()
            .remove(name)
            .ok_or_else(|| QueueError::WorkerNotFound(name.to_string()))?;
        handle.shutdown().await
    }

    /// Aggregate store counts plus per-pool throughput
    pub async fn get_stats(&self) -> QueueResult<QueueStats> {
        let counts = self.store.counts().await?;
        let workers = {
            let workers = self.workers.lock();
            let mut stats: Vec<_> = workers.values().map(|handle| handle.stats()).collect();
            stats.sort_by(|a, b| a.name.cmp(&b.name));
            stats
        };
        Ok(QueueStats::from_counts(counts, workers))
    }

    /// Run one promotion scan immediately (deterministic alternative to
    /// waiting for the promoter interval; used heavily by tests)
    pub async fn run_promotion_cycle(&self) -> QueueResult<usize> {
        self.store.promote_delayed(Utc::now()).await
    }

    /// Subscribe to the store's lifecycle event stream
    pub fn event_stream(&self) -> BoxStream<JobEvent> {
        self.store.event_stream()
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }
}
