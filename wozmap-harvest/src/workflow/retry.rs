//! Exponential backoff for transient upstream errors
//!
//! **Backoff Strategy:**
//! - Attempt n (1-based) waits `initial * 2^(n-1)`, capped at `max`
//! - An upstream `Retry-After` raises the delay, still capped at `max`
//! - A step is given up after `max_attempts` attempts

use std::time::Duration;

/// Retry policy for one pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retrying after failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let exponential = self
            .initial
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max);

        match retry_after {
            Some(requested) if requested > exponential => requested.min(self.max),
            _ => exponential,
        }
    }

    /// Whether another attempt is allowed after `attempt` failed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
