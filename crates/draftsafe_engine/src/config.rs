//! Configuration for the sync orchestrator.

use std::time::Duration;

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Retry configuration for per-note sync sessions.
    pub retry: RetryConfig,
    /// Poll interval used by `wait_for_sync` while sessions are live.
    pub wait_poll_interval: Duration,
    /// Whether the engine starts in the online state.
    pub start_online: bool,
}

impl SyncConfig {
    /// Creates a configuration with the default retry policy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            wait_poll_interval: Duration::from_millis(25),
            start_online: true,
        }
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the `wait_for_sync` poll interval.
    #[must_use]
    pub fn with_wait_poll_interval(mut self, interval: Duration) -> Self {
        self.wait_poll_interval = interval;
        self
    }

    /// Sets the initial connectivity state.
    #[must_use]
    pub fn with_start_online(mut self, online: bool) -> Self {
        self.start_online = online;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
///
/// The default policy is three attempts with exponential backoff:
/// 1s before the second attempt, 2s before the third, capped at 8s.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for any backoff delay.
    pub max_delay: Duration,
    /// Multiplier applied per subsequent attempt.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with the given attempt budget.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    /// Creates a configuration with no retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables jitter on backoff delays.
    #[must_use]
    pub fn with_jitter(mut self) -> Self {
        self.add_jitter = true;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    ///
    /// Attempt 0 is the first attempt and has no delay.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter, always additive
            Duration::from_secs_f64(capped + capped * 0.25 * clock_jitter())
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Cheap pseudo-random jitter derived from the clock (no RNG dependency).
fn clock_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(8));
        // capped
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(8));
    }

    #[test]
    fn no_retry_preset() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn jitter_is_bounded_and_additive() {
        let config = RetryConfig::new(3).with_jitter();
        let delay = config.delay_for_attempt(1);
        assert!(delay >= Duration::from_secs(1));
        assert!(delay <= Duration::from_millis(1250));
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_retry(RetryConfig::no_retry())
            .with_wait_poll_interval(Duration::from_millis(5))
            .with_start_online(false);

        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.wait_poll_interval, Duration::from_millis(5));
        assert!(!config.start_online);
    }
}
