//! Retry policy for single register reads

use super::transport::TransportError;
use std::time::Duration;

/// How often a failed read is repeated before the error is published
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: u32,
    /// Fixed pause between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    /// No retries; a failed read is reported as-is
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }

    /// Fixed delay between up to `max_retries` extra attempts
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Whether attempt number `attempt` (0-based, already failed with `error`)
    /// should be followed by another one
    pub fn should_retry(&self, attempt: u32, error: &TransportError) -> bool {
        attempt < self.max_retries && error.is_retryable()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}
