use std::time::Duration;

/// Tuning knobs for the engine, worker pools, and promoter
///
/// Injected into `JobEngine`; no process-wide state.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long an idle worker sleeps before polling the pending set again
    pub poll_interval: Duration,

    /// How long a worker backs off after a store error
    pub error_backoff: Duration,

    /// How often the promoter scans the delayed set
    pub promote_interval: Duration,

    /// Maximum entries retained per archive (completed / failed); oldest evicted
    pub archive_limit: usize,

    /// Upper bound on cooperative drain when stopping a pool
    pub shutdown_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
            promote_interval: Duration::from_millis(250),
            archive_limit: 1_000,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn promote_interval(mut self, interval: Duration) -> Self {
        self.promote_interval = interval;
        self
    }

    pub fn archive_limit(mut self, limit: usize) -> Self {
        self.archive_limit = limit;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}
