//! Exponential retry backoff for session establishment.
//!
//! The backoff state is an explicit value (no clocks, no timers) so the
//! retry schedule is deterministic and testable: callers ask for the next
//! delay, sleep however they like, and reset on success.

use std::time::Duration;

/// Doubling backoff with a cap
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    cap: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self {
            initial,
            cap,
            next: initial,
        }
    }

    /// The delay to wait before the next attempt; doubles on each call
    /// until the cap is reached
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.cap);
        delay
    }

    /// Restart the schedule after a successful attempt
    pub fn reset(&mut self) {
        self.next = self.initial;
    }

    /// The delay the next call to [`next_delay`](Self::next_delay) returns
    pub fn current(&self) -> Duration {
        self.next
    }
}
