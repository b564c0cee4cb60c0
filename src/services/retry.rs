//! Capped exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

use crate::constants::{VISION_BACKOFF_BASE_MS, VISION_BACKOFF_MAX_MS, VISION_MAX_ATTEMPTS};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one; never below 1
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of each delay that may be shaved off at random, 0.0..=1.0
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: VISION_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(VISION_BACKOFF_BASE_MS),
            max_delay: Duration::from_millis(VISION_BACKOFF_MAX_MS),
            jitter: 0.5,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, 0.0)
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Un-jittered delay before retry `retry` (1 = the first retry).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    pub fn delay_with<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let backoff = self.backoff(retry);
        if self.jitter == 0.0 {
            return backoff;
        }
        let shave: f64 = rng.random::<f64>() * self.jitter;
        backoff.mul_f64(1.0 - shave)
    }

    pub fn delay(&self, retry: u32) -> Duration {
        self.delay_with(retry, &mut rand::rng())
    }

    /// Upper bound on time spent sleeping across all retries.
    pub fn max_total_delay(&self) -> Duration {
        (1..self.max_attempts).map(|retry| self.backoff(retry)).sum()
    }

    /// Upper bound on wall time when every attempt runs to `per_call`.
    pub fn worst_case(&self, per_call: Duration) -> Duration {
        per_call.saturating_mul(self.max_attempts) + self.max_total_delay()
    }
}
