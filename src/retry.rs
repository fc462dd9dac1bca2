//! Failure classification and backoff scheduling.
//!
//! Handlers report [`HandlerError::Retryable`] or [`HandlerError::Fatal`]
//! (see [`crate::error`]); this module decides *when* a retryable event
//! becomes claimable again, and when the retry budget is spent.

use std::time::{Duration, SystemTime};

/// Bounded exponential backoff with jitter.
///
/// The delay before attempt `n + 1` is
/// `min(base_delay * 2^n, max_delay)`, randomized by ±`jitter` to spread
/// reclaims from a burst of same-cycle failures.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Jitter fraction in `0.0..=1.0`. `0.2` means ±20%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(10 * 60),
            max_attempts: 8,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Whether the retry budget is spent after `attempts` tries.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// The capped exponential delay before the next attempt, without
    /// jitter.
    pub fn raw_delay(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// The randomized delay before the next attempt.
    pub fn delay(&self, attempts: u32) -> Duration {
        apply_jitter(self.raw_delay(attempts), self.jitter)
    }

    /// The absolute time at which the event becomes claimable again.
    pub fn next_attempt_at(&self, now: SystemTime, attempts: u32) -> SystemTime {
        now + self.delay(attempts)
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    use rand::Rng;

    let range_ms = (delay.as_millis() as f64 * jitter) as u64;
    if range_ms == 0 {
        return delay;
    }

    let mut rng = rand::thread_rng();
    let offset = Duration::from_millis(rng.gen_range(0..=range_ms));
    if rng.gen_bool(0.5) {
        delay.saturating_add(offset)
    } else {
        delay.saturating_sub(offset)
    }
}
