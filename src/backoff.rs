//! Exponential backoff calculator.
use std::time::Duration;

/// Exponential backoff with a ceiling.
///
/// The n-th call to [`Backoff::get`] (0-indexed) returns `min(base * 2^n, max_wait)`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_wait: Duration,
    /// Wait of the next attempt, before applying the ceiling.
    next: Duration,
}

impl Backoff {
    /// Default base for [`Backoff::default`].
    pub const DEFAULT_BASE: Duration = Duration::from_secs(1);
    /// Default ceiling for [`Backoff::default`].
    pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30 * 60);

    /// Create a new backoff starting at `base` and never exceeding `max_wait`.
    pub fn new(base: Duration, max_wait: Duration) -> Backoff {
        Backoff {
            base,
            max_wait,
            next: base,
        }
    }

    /// Return how long to wait before the next attempt and advance the attempt counter.
    pub fn get(&mut self) -> Duration {
        let wait = self.next.min(self.max_wait);
        if self.next < self.max_wait {
            self.next = self.next.saturating_mul(2);
        }
        wait
    }

    /// Start over from `base`.
    pub fn reset(&mut self) {
        self.next = self.base;
    }
}

impl Default for Backoff {
    fn default() -> Backoff {
        Backoff::new(Backoff::DEFAULT_BASE, Backoff::DEFAULT_MAX_WAIT)
    }
}
