// ABOUTME: Exponential backoff between transport connect attempts

use std::time::Duration;

use super::config::ReconnectPolicy;

/// Exponential backoff calculator for reconnect delays
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    /// Retries handed out so far (0-indexed)
    current_attempt: u32,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff calculator
    ///
    /// # Arguments
    /// * `base` - Delay before the first retry
    /// * `max` - Maximum delay cap
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current_attempt: 0,
        }
    }

    /// Backoff configured from a reconnect policy
    #[must_use]
    pub const fn from_policy(policy: &ReconnectPolicy) -> Self {
        Self::new(policy.base_delay, policy.max_delay)
    }

    /// Calculate the next delay and increment the attempt counter
    ///
    /// Returns `min(base * 2^attempt, max)`
    pub fn next_delay(&mut self) -> Duration {
        let multiplier = 2u64.saturating_pow(self.current_attempt);
        let base_millis = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let delay = Duration::from_millis(base_millis.saturating_mul(multiplier));

        self.current_attempt = self.current_attempt.saturating_add(1);

        std::cmp::min(delay, self.max)
    }

    /// Reset the attempt counter to 0
    pub const fn reset(&mut self) {
        self.current_attempt = 0;
    }

    /// Get the current attempt number
    #[must_use]
    pub const fn current_attempt(&self) -> u32 {
        self.current_attempt
    }
}
