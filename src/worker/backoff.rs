//! Exponential backoff for retryable operations.

use std::time::Duration;

use rand::Rng;

/// Retry policy: exponential delay with a cap, jittered, bounded by a
/// maximum attempt count.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Delay to sleep before retry number `attempt` (1-based: the delay
    /// after the first failure is `delay(1)`).
    ///
    /// Jitter keeps concurrent retriers from synchronizing: the returned
    /// delay is uniformly drawn from the upper half of the exponential
    /// value.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let exact = self.base.as_secs_f64() * self.multiplier.powi(exponent as i32);
        let capped = exact.min(self.cap.as_secs_f64());
        let jittered = rand::thread_rng().gen_range(capped / 2.0..=capped);
        Duration::from_secs_f64(jittered)
    }

    /// Whether another attempt is allowed after `attempts` failures.
    #[must_use]
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
