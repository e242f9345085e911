use std::time::Duration;

use posco_common::config::NotifierConfig;

use crate::message::DEFAULT_MAX_RETRIES;

/// Bounded exponential backoff shared by every message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &NotifierConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// Delay before the resend that follows attempt number `retry_count`:
    /// `base_delay * 2^retry_count`, capped at `max_delay`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(16));
        assert_eq!(policy.backoff(5), Duration::from_secs(30));
        assert_eq!(policy.backoff(64), Duration::from_secs(30));
    }

    #[test]
    fn test_from_config() {
        let mut config = NotifierConfig::with_endpoints("https://a", "https://b");
        config.max_retries = 5;
        config.retry_base_delay_ms = 250;
        config.retry_max_delay_ms = 1000;
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(3), Duration::from_millis(1000));
    }
}
