use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{QueueError, QueueResult};
use crate::types::job::{BackoffStrategy, Priority};

/// Default per-attempt deadline: 30 seconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default total attempts before a job fails permanently
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Caller-supplied knobs for `enqueue`
///
/// Builder-style setters; validation happens once when the job is created so
/// malformed options are rejected synchronously and no job ever exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueOptions {
    pub priority: Priority,
    pub delay_ms: u64,
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    pub timeout_ms: u64,
    pub metadata: HashMap<String, String>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: Priority::default(),
            delay_ms: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffStrategy::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            metadata: HashMap::new(),
        }
    }
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set priority from a raw 1-10 rank; range checked by `validate`
    pub fn priority_rank(mut self, rank: u8) -> QueueResult<Self> {
        self.priority = Priority::new(rank)?;
        Ok(self)
    }

    pub fn delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Reject malformed options before any job is constructed
    pub fn validate(self) -> QueueResult<Self> {
        if self.max_attempts == 0 {
            return Err(QueueError::Validation(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(QueueError::Validation(
                "timeout_ms must be positive".to_string(),
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = EnqueueOptions::default().validate().unwrap();
        assert_eq!(options.priority.rank(), 5);
        assert_eq!(options.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(options.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn zero_max_attempts_rejected() {
        let result = EnqueueOptions::default().max_attempts(0).validate();
        assert!(matches!(result, Err(QueueError::Validation(_))));
    }

    #[test]
    fn out_of_range_priority_rejected() {
        assert!(EnqueueOptions::default().priority_rank(0).is_err());
        assert!(EnqueueOptions::default().priority_rank(11).is_err());
        assert!(EnqueueOptions::default().priority_rank(10).is_ok());
    }
}
