//! Backoff delay calculation for retry policies

use rand::Rng;
use std::time::Duration;

/// Upper bound of the jitter, as a fraction of the exponential component
const JITTER_FRACTION: f64 = 0.1;

/// Backoff delay calculator
///
/// With exponential backoff the delay for attempt `n` (0-indexed) is
/// `min(base * 2^n + jitter, max)` where `jitter` is drawn uniformly from
/// `[0, 0.1 * base * 2^n)`. Without it the delay is always `base`.
#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    initial_delay: Duration,
    max_delay: Duration,
    exponential: bool,
}

impl BackoffCalculator {
    /// Create a new backoff calculator
    pub fn new(initial_delay: Duration, max_delay: Duration, exponential: bool) -> Self {
        Self {
            initial_delay,
            max_delay,
            exponential,
        }
    }

    /// Delay for an attempt without jitter, capped at the maximum
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.initial_delay;
        }

        match self.exponential_component(attempt) {
            Some(delay) => delay.min(self.max_delay),
            None => self.max_delay,
        }
    }

    /// Delay for an attempt including jitter, capped at the maximum
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.initial_delay;
        }

        match self.exponential_component(attempt) {
            Some(delay) => {
                let factor = rand::thread_rng().gen_range(0.0..JITTER_FRACTION);
                delay
                    .saturating_add(delay.mul_f64(factor))
                    .min(self.max_delay)
            }
            None => self.max_delay,
        }
    }

    /// `initial_delay * 2^attempt`, or `None` on overflow
    fn exponential_component(&self, attempt: u32) -> Option<Duration> {
        2u32.checked_pow(attempt)
            .and_then(|multiplier| self.initial_delay.checked_mul(multiplier))
    }
}
