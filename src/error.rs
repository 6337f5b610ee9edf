use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors surfaced to callers of the engine and store
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    /// Malformed enqueue options; rejected synchronously, job never created
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Backing store is unreachable; nothing was removed, no job loss
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Processor already registered for job type: {0}")]
    ProcessorExists(String),

    #[error("Worker pool already running: {0}")]
    WorkerExists(String),

    #[error("No worker pool named: {0}")]
    WorkerNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Per-attempt execution failure - every variant consumes one attempt and
/// feeds the retry manager identically
#[derive(Error, Debug, Clone)]
pub enum ExecuteError {
    /// No processor registered for the job's type
    #[error("No processor registered for job type: {0}")]
    ProcessorMissing(String),

    /// The processor returned an error
    #[error("Processor failed: {0}")]
    Handler(String),

    /// The attempt exceeded the job's deadline
    #[error("Execution exceeded {0}ms deadline")]
    Timeout(u64),
}

/// Error type returned by caller-supplied processors
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ProcessError {
    message: String,
}

impl ProcessError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ProcessError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProcessError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
