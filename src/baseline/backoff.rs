//! Bounded exponential backoff for calibration retries

use std::time::Duration;

/// Retry delay that doubles on every consecutive miss, up to a ceiling.
///
/// Sequence with a 10 s base and 300 s cap: 10, 20, 40, 80, 160, 300, 300, ...
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryBackoff {
    base: Duration,
    cap: Duration,
    misses: u32,
}

impl RetryBackoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
            misses: 0,
        }
    }

    /// Delay for the current miss, then count it.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.peek();
        self.misses = self.misses.saturating_add(1);
        delay
    }

    /// Delay the next miss would get, without counting it.
    ///
    /// Any overflow of `base × 2^misses` saturates to the cap.
    pub fn peek(&self) -> Duration {
        2u32.checked_pow(self.misses)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |d| d.min(self.cap))
    }

    pub fn reset(&mut self) {
        self.misses = 0;
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }

    pub fn base(&self) -> Duration {
        self.base
    }
}
