//! Delay policy between reconnect attempts.

use std::time::Duration;

/// Upper bound on the exponent so the delay computation cannot overflow.
const MAX_EXPONENT: u32 = 16;

/// How long to wait before each reconnect attempt, and when to stop.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Double the delay on each consecutive failure, capped at `max_delay`.
    pub exponential: bool,
    /// `None` keeps retrying for as long as the session has listeners.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Same delay before every attempt.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            exponential: false,
            max_attempts: None,
        }
    }

    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            exponential: true,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Delay before the given attempt; attempts are counted from 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.base_delay;
        }

        let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
        let delay = self.base_delay.as_secs_f64() * 2_f64.powi(exponent as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Whether another attempt is allowed after `attempts_made`.
    pub fn allows(&self, attempts_made: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts_made < max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1), Duration::from_secs(30))
    }
}
