use std::time::Duration;

/// Configuration for the webhook dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum delivery attempts per action, the first included.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub base_delay: Duration,
    /// Ceiling on a single retry delay.
    pub max_delay: Duration,
    /// Per-attempt timeout when the action does not override it.
    pub default_timeout: Duration,
    /// Wall-clock budget for one action across all retries.
    pub overall_budget: Duration,
    /// Concurrent delivery cap across all alerts.
    pub max_concurrent: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            default_timeout: Duration::from_secs(10),
            overall_budget: Duration::from_secs(60),
            max_concurrent: 64,
        }
    }
}

impl DispatcherConfig {
    /// Set the maximum attempts per action.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the base retry delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the default per-attempt timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the concurrent delivery cap.
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }
}
