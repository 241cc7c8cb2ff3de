use std::time::Duration;

use rand::Rng;

/// Exponential reconnect backoff with full jitter.
///
/// Each failed attempt doubles the ceiling, capped at the configured
/// maximum; the actual delay is drawn uniformly from `[min, ceiling]` so a
/// herd of clients does not reconnect in lockstep. A sufficiently long
/// stable Ready period resets the ceiling back to the minimum.
#[derive(Debug)]
pub(crate) struct Backoff {
    min: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            attempt: 0,
        }
    }

    /// The delay to apply before the next reconnect attempt.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let shift = self.attempt.min(16);
        self.attempt = self.attempt.saturating_add(1);

        let ceiling = self
            .min
            .saturating_mul(1u32 << shift)
            .min(self.max)
            .max(self.min);

        let range = ceiling.saturating_sub(self.min);
        if range.is_zero() {
            return self.min;
        }
        let jitter = rand::thread_rng().gen_range(0..=range.as_nanos() as u64);
        self.min + Duration::from_nanos(jitter)
    }

    /// Forgets accumulated failures after a stable Ready period.
    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }
}
