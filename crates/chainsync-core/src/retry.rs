//! Capped exponential backoff for batch-level retries.

use std::time::Duration;

/// Configuration for the retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum retry attempts after the first try. `0` surfaces the first
    /// error immediately.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 8,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Never give up; delays stay capped at `max_backoff`.
    pub fn unbounded() -> Self {
        Self {
            max_retries: u32::MAX,
            ..Self::default()
        }
    }

    /// Surface the first failure without retrying.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Stateless retry policy — computes the next delay given the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before the `attempt`-th retry (1-based), or `None` once the
    /// budget is spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        let exponent = (attempt - 1).min(64) as i32;
        let base_ms =
            self.config.initial_backoff.as_millis() as f64 * self.config.multiplier.powi(exponent);
        let cap_ms = self.config.max_backoff.as_millis() as f64;
        Some(Duration::from_millis(base_ms.min(cap_ms) as u64))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
