use std::time::Duration;

use crate::config::ReconnectConfig;

/// Bounded reconnect policy with exponential backoff and multiplicative jitter
///
/// Attempt `k` (1-indexed) waits `base^k * uniform(0, ceil(base^k * ratio))`
/// seconds. There is no cap; after `max_attempts` failures the caller gives up.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: usize,
    pub base_seconds: f64,
    pub jitter_ratio: f64,
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_seconds: config.backoff_base_seconds,
            jitter_ratio: config.jitter_ratio,
            connect_timeout: config.connect_timeout(),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff in seconds before jitter
    pub fn backoff(&self, attempt: usize) -> f64 {
        self.base_seconds.powi(attempt as i32)
    }

    /// Upper bound of the jitter multiplier
    pub fn jitter(&self, attempt: usize) -> f64 {
        (self.backoff(attempt) * self.jitter_ratio).ceil()
    }

    /// Delay for `attempt` given a sample drawn from [0, 1)
    pub fn delay_for_sample(&self, attempt: usize, sample: f64) -> Duration {
        let seconds = self.backoff(attempt) * (sample * self.jitter(attempt));
        Duration::from_secs_f64(seconds.max(0.0))
    }

    /// Randomized delay before reconnect attempt `attempt`
    pub fn delay(&self, attempt: usize) -> Duration {
        self.delay_for_sample(attempt, fastrand::f64())
    }

    /// Largest delay this policy can produce for `attempt`
    pub fn max_delay(&self, attempt: usize) -> Duration {
        Duration::from_secs_f64(self.backoff(attempt) * self.jitter(attempt))
    }

    pub fn allows(&self, attempt: usize) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }
}
