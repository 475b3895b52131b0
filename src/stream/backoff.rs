//! Exponential reconnect backoff.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry
    #[serde(with = "crate::config::duration_ms")]
    pub base: Duration,
    /// Upper bound for any single delay
    #[serde(with = "crate::config::duration_ms")]
    pub cap: Duration,
    /// Consecutive failures tolerated before giving up (`None` retries forever)
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(10),
            max_attempts: Some(5),
        }
    }
}

/// Doubling delay sequence: base, 2*base, 4*base, ... capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Register a failure and get the delay before the next attempt.
    ///
    /// Returns `None` once `max_attempts` consecutive failures were already
    /// scheduled.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.config.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }
        let delay = self.delay_for(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        Some(delay)
    }

    /// Back to the base delay after a successful open.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Retries scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.config
            .base
            .checked_mul(factor)
            .unwrap_or(self.config.cap)
            .min(self.config.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(d: Option<Duration>) -> Option<u64> {
        d.map(|d| d.as_secs())
    }

    #[test]
    fn test_doubling_sequence_capped() {
        let mut backoff = Backoff::new(BackoffConfig {
            max_attempts: None,
            ..BackoffConfig::default()
        });

        let delays: Vec<Option<u64>> = (0..6).map(|_| secs(backoff.next_delay())).collect();
        assert_eq!(
            delays,
            vec![Some(1), Some(2), Some(4), Some(8), Some(10), Some(10)]
        );
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut backoff = Backoff::new(BackoffConfig::default());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(secs(backoff.next_delay()), Some(1));
    }

    #[test]
    fn test_max_attempts() {
        let mut backoff = Backoff::new(BackoffConfig {
            max_attempts: Some(2),
            ..BackoffConfig::default()
        });
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn test_monotonic_for_large_attempt_counts() {
        let mut backoff = Backoff::new(BackoffConfig {
            max_attempts: None,
            ..BackoffConfig::default()
        });
        let mut previous = Duration::ZERO;
        for _ in 0..100 {
            let delay = backoff.next_delay().unwrap();
            assert!(delay >= previous);
            previous = delay;
        }
        assert_eq!(previous, Duration::from_secs(10));
    }
}
