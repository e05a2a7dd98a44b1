//! Exponential backoff for empty polls and store retries

use crate::config::{PollingConfig, RetryConfig};
use rand::Rng;
use std::time::Duration;

/// Exponential backoff between empty dequeue attempts or store retries
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: bool) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: multiplier.max(1.0),
            jitter,
        }
    }

    /// Sleep before attempt number `attempt` (zero based)
    ///
    /// With jitter the sleep is drawn uniformly from `[delay / 2, delay]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(32) as i32);
        let millis = (self.initial.as_millis() as f64 * factor).min(self.max.as_millis() as f64);
        let millis = millis as u64;

        if self.jitter && millis > 1 {
            let mut rng = rand::thread_rng();
            Duration::from_millis(rng.gen_range(millis / 2..=millis))
        } else {
            Duration::from_millis(millis)
        }
    }
}

impl From<&PollingConfig> for BackoffPolicy {
    fn from(config: &PollingConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.backoff_multiplier,
            config.jitter,
        )
    }
}

/// Retries of transient store errors wait without jitter
impl From<&RetryConfig> for BackoffPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.backoff_multiplier,
            false,
        )
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_until_capped() {
        let policy = BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(1000),
            2.0,
            false,
        );
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(4), Duration::from_millis(1000));
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_retry_policy_from_config_is_capped_without_jitter() {
        let policy = BackoffPolicy::from(&RetryConfig::default());
        // No jitter, so repeated calls agree
        assert_eq!(policy.delay(0), Duration::from_millis(1000));
        assert_eq!(policy.delay(0), Duration::from_millis(1000));
        assert_eq!(policy.delay(1), Duration::from_millis(2000));
        assert_eq!(policy.delay(10), Duration::from_millis(30000));
    }

    #[test]
    fn test_jitter_stays_within_half_and_full_delay() {
        let policy = BackoffPolicy::new(
            Duration::from_millis(400),
            Duration::from_millis(400),
            2.0,
            true,
        );
        for _ in 0..100 {
            let delay = policy.delay(2);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(400));
        }
    }

    #[test]
    fn test_from_polling_config() {
        let config = PollingConfig {
            initial_delay_ms: 50,
            max_delay_ms: 20,
            backoff_multiplier: 0.5,
            jitter: false,
        };
        let policy = BackoffPolicy::from(&config);
        assert_eq!(policy.delay(0), Duration::from_millis(50));
        assert_eq!(policy.delay(5), Duration::from_millis(50));
    }
}
