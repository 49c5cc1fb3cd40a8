//! Capped reconnect delays for the relay subscriber and the relay client.

use std::time::Duration;

/// How the delay grows with each consecutive failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// `attempt × step`.
    Linear,
    /// `step × 2^(attempt - 1)`.
    Exponential,
}

/// Reconnect delay policy. Attempts are unbounded; only the delay is capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    step: Duration,
    max: Duration,
    growth: Growth,
    attempt: u32,
}

impl Backoff {
    pub fn new(step: Duration, max: Duration, growth: Growth) -> Self {
        Self {
            step,
            max,
            growth,
            attempt: 0,
        }
    }

    /// Redis resubscribe policy: 50 ms per attempt, capped at 2 s.
    pub fn redis() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_secs(2), Growth::Linear)
    }

    /// Relay client policy: 1 s doubling, capped at 5 s.
    pub fn client() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(5), Growth::Exponential)
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let delay = match self.growth {
            Growth::Linear => self.step.saturating_mul(self.attempt),
            Growth::Exponential => {
                let shift = (self.attempt - 1).min(31);
                self.step.saturating_mul(1u32 << shift)
            }
        };
        delay.min(self.max)
    }

    /// Forget past failures after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::redis()
    }
}
