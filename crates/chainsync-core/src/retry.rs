//! Exponential backoff for failed poll iterations and block fetches.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Consecutive failures tolerated; the failure that reaches this count is final.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay_ms: u64,
    /// Multiplier applied to the delay on each further failure.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 5_000,
            multiplier: 2.0,
            max_delay_ms: 600_000,
        }
    }
}

/// Stateless retry policy: computes the next delay from the failure count.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before the next attempt after `failures` consecutive failures
    /// (1-based): `base * multiplier^(failures - 1)`, capped at `max_delay`.
    ///
    /// Returns `None` once `failures` reaches `max_attempts`.
    pub fn next_delay(&self, failures: u32) -> Option<Duration> {
        if !self.should_retry(failures) {
            return None;
        }
        let exp = failures.saturating_sub(1) as i32;
        let ms = self.config.base_delay_ms as f64 * self.config.multiplier.powi(exp);
        let capped = ms.min(self.config.max_delay_ms as f64);
        Some(Duration::from_millis(capped as u64))
    }

    /// Returns `true` if another attempt is allowed after `failures` failures.
    pub fn should_retry(&self, failures: u32) -> bool {
        failures < self.config.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubling_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(5)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_secs(10)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_secs(20)));
        assert_eq!(policy.next_delay(4), Some(Duration::from_secs(40)));
        assert_eq!(policy.next_delay(5), None);
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 20,
            base_delay_ms: 100,
            multiplier: 10.0,
            max_delay_ms: 500,
        });
        let d = policy.next_delay(6).unwrap();
        assert_eq!(d, Duration::from_millis(500));
    }

    #[test]
    fn should_retry_boundary() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 2,
            ..Default::default()
        });
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }
}
