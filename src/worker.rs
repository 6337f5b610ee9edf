use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::{ExecuteError, QueueError, QueueResult};
use crate::registry::{ProcessContext, ProcessorRegistry};
use crate::retry::RetryManager;
use crate::store::QueueStore;
use crate::types::{Job, WorkerStats};

/// Shared throughput counters for one pool
///
/// `processed` and `failed` count terminal outcomes: a retried attempt
/// increments neither, so across all pools the two sum to the number of
/// jobs that reached a terminal state.
#[derive(Default)]
pub(crate) struct WorkerCounters {
    active: AtomicUsize,
    processed: AtomicU64,
    failed: AtomicU64,
    running: AtomicBool,
}

impl WorkerCounters {
    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub(crate) fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub(crate) fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

/// A named, concurrency-bounded consumer of the shared store
///
/// Multiple pools may run against one store at the same time; correctness
/// rests entirely on the store's atomic `dequeue_next`.
pub struct WorkerPool {
    name: String,
    concurrency: usize,
    store: Arc<dyn QueueStore>,
    registry: Arc<RwLock<ProcessorRegistry>>,
    retry: Arc<RetryManager>,
    config: QueueConfig,
}

impl WorkerPool {
    pub fn new(
        name: impl Into<String>,
        concurrency: usize,
        store: Arc<dyn QueueStore>,
        registry: Arc<RwLock<ProcessorRegistry>>,
        retry: Arc<RetryManager>,
        config: QueueConfig,
    ) -> Self {
        Self {
            name: name.into(),
            concurrency: concurrency.max(1),
            store,
            registry,
            retry,
            config,
        }
    }

    /// Start the dequeue loop and return a handle for stats and shutdown
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let counters = Arc::new(WorkerCounters::default());
        counters.running.store(true, Ordering::Relaxed);

        let name = self.name.clone();
        let concurrency = self.concurrency;
        let loop_counters = counters.clone();
        let join_handle = tokio::spawn(self.run(shutdown_rx, loop_counters));

        WorkerHandle {
            name,
            concurrency,
            counters,
            shutdown_tx,
            join_handle,
        }
    }

    async fn run(self, mut shutdown_rx: oneshot::Receiver<()>, counters: Arc<WorkerCounters>) {
        info!(pool = %self.name, concurrency = self.concurrency, "worker pool started");
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        loop {
            // Wait for a free execution slot before touching the store so a
            // saturated pool never claims work it cannot start.
            let permit = tokio::select! {
                _ = &mut shutdown_rx => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.store.dequeue_next().await {
                Ok(Some(job)) => {
                    counters.active.fetch_add(1, Ordering::Relaxed);
                    let store = self.store.clone();
                    let registry = self.registry.clone();
                    let retry = self.retry.clone();
                    let task_counters = counters.clone();
                    let pool = self.name.clone();
                    tokio::spawn(async move {
                        execute_job(job, store, registry, retry, &task_counters, &pool).await;
                        task_counters.active.fetch_sub(1, Ordering::Relaxed);
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(err) => {
                    drop(permit);
                    error!(pool = %self.name, "dequeue failed: {err}");
                    tokio::time::sleep(self.config.error_backoff).await;
                }
            }
        }

        counters.running.store(false, Ordering::Relaxed);

        // Cooperative drain: stop dequeuing, let in-flight jobs finish.
        // Work a handler offloaded to its own task is beyond the pool's
        // reach and keeps running detached.
        let drain = semaphore.clone().acquire_many_owned(self.concurrency as u32);
        if tokio::time::timeout(self.config.shutdown_timeout, drain)
            .await
            .is_err()
        {
            warn!(
                pool = %self.name,
                "shutdown timeout elapsed with jobs still in flight"
            );
        }
        info!(pool = %self.name, "worker pool stopped");
    }
}

/// One claimed-to-terminal execution: race the processor against the job's
/// deadline, then complete or hand the failure to the retry manager.
async fn execute_job(
    job: Job,
    store: Arc<dyn QueueStore>,
    registry: Arc<RwLock<ProcessorRegistry>>,
    retry: Arc<RetryManager>,
    counters: &WorkerCounters,
    pool: &str,
) {
    debug!(pool, job_id = %job.id, job_type = %job.job_type, "claimed job");

    let processor = registry.read().resolve(&job.job_type);
    let outcome: Result<Value, ExecuteError> = match processor {
        None => Err(ExecuteError::ProcessorMissing(job.job_type.clone())),
        Some(processor) => {
            let ctx = ProcessContext::new(job.clone(), store.clone());
            let deadline = Duration::from_millis(job.timeout_ms);
            match tokio::time::timeout(deadline, processor.execute(&ctx)).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(ExecuteError::Handler(err.to_string())),
                Err(_) => Err(ExecuteError::Timeout(job.timeout_ms)),
            }
        }
    };

    match outcome {
        Ok(value) => {
            let mut job = job;
            job.complete(value);
            match store.archive(job.clone()).await {
                Ok(()) => {
                    counters.processed.fetch_add(1, Ordering::Relaxed);
                    info!(pool, job_id = %job.id, "job completed");
                }
                Err(err) => error!(pool, job_id = %job.id, "failed to archive completed job: {err}"),
            }
        }
        Err(exec_err) => match retry.handle_failure(job, exec_err).await {
            Ok(updated) if updated.status == crate::types::JobStatus::Failed => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {}
            Err(err) => error!(pool, "retry bookkeeping failed: {err}"),
        },
    }
}

/// Handle for one running pool: stats snapshot plus cooperative shutdown
pub struct WorkerHandle {
    name: String,
    concurrency: usize,
    counters: Arc<WorkerCounters>,
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current throughput snapshot
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            name: self.name.clone(),
            concurrency: self.concurrency,
            active_jobs: self.counters.active(),
            processed_jobs: self.counters.processed(),
            failed_jobs: self.counters.failed(),
            running: self.counters.is_running(),
        }
    }

    /// Signal shutdown and wait for in-flight jobs to drain
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| QueueError::Internal(format!("worker join error: {e}")))
    }
}
