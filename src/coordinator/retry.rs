//! Retry attempt bookkeeping.
//!
//! The attempt table maps each request key to the number of retries already
//! spent on it. The counter is always within `[0, max_attempts]`: it is cleared
//! on success, on a non-retryable failure, and when the attempts run out, so a
//! later request for the same key starts again from zero.

use std::collections::HashMap;
use std::time::Duration;

use crate::coordinator::{RequestKey, RetryConfig};
use crate::error::FailureKind;

/// Per-key retry attempt table.
#[derive(Debug)]
pub struct RetryState {
    config: RetryConfig,
    attempts: HashMap<RequestKey, u32>,
}

impl RetryState {
    /// Create an empty attempt table.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: HashMap::new(),
        }
    }

    /// Decide whether a failed request should be retried.
    ///
    /// Returns the delay before the next attempt and counts it, or `None` when the
    /// failure is not retryable or the attempts are exhausted. `None` always
    /// clears the key's counter.
    pub fn next_delay(&mut self, key: &RequestKey, kind: FailureKind) -> Option<Duration> {
        let Some(schedule) = self.config.schedule(kind) else {
            self.attempts.remove(key);
            return None;
        };

        let attempts = self.attempts.get(key).copied().unwrap_or(0);
        if attempts >= self.config.max_attempts {
            self.attempts.remove(key);
            return None;
        }

        let delay = schedule.delay_for(attempts);
        self.attempts.insert(key.clone(), attempts + 1);
        Some(delay)
    }

    /// Clear the key's counter after a success.
    pub fn clear(&mut self, key: &RequestKey) {
        self.attempts.remove(key);
    }

    /// Retries spent on a key so far.
    pub fn attempts(&self, key: &RequestKey) -> u32 {
        self.attempts.get(key).copied().unwrap_or(0)
    }

    /// Clear every counter.
    pub fn clear_all(&mut self) {
        self.attempts.clear();
    }
}
