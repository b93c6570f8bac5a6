//! Reconnect delay policy
//!
//! Linear growth capped at a maximum, plus uniform jitter:
//!
//! ```text
//! delay = min(base * attempt, max) + uniform[0, jitter)
//! ```
//!
//! The result is never below `base`. The policy is stateless; the reconnect
//! loop owns the attempt counter.

use std::time::Duration;

use rand::Rng;

/// Reconnect backoff configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Cap before jitter is added
    pub max_delay: Duration,
    /// Upper bound (exclusive) of the random jitter
    pub max_jitter: Duration,
}

impl BackoffPolicy {
    /// Create a new policy
    pub fn new(base_delay: Duration, max_delay: Duration, max_jitter: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            max_jitter,
        }
    }

    /// Delay before reconnect attempt number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..self.max_jitter)
        };

        self.delay_without_jitter(attempt)
            .saturating_add(jitter)
            .max(self.base_delay)
    }

    /// Deterministic part of [`delay`](Self::delay)
    pub fn delay_without_jitter(&self, attempt: u32) -> Duration {
        self.base_delay
            .checked_mul(attempt.max(1))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            max_jitter: Duration::from_millis(500),
        }
    }
}
