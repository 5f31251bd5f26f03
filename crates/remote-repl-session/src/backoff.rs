//! Reconnect policy.

use std::time::Duration;

/// Exponential reconnect backoff.
///
/// Attempt 0 runs immediately; attempt `n` waits `base_delay * 2^(n-1)`,
/// capped at `max_delay`. The attempt counter resets after every successful
/// connect. With `max_attempts: None` the session retries forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay unit; the wait before attempt 1.
    pub base_delay: Duration,
    /// Upper bound on a single wait.
    pub max_delay: Option<Duration>,
    /// Consecutive failed attempts after which the session gives up.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1),
            max_delay: Some(Duration::from_secs(30)),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Policy with a custom delay unit and the default cap.
    #[must_use]
    pub fn with_base_delay(base_delay: Duration) -> Self {
        Self {
            base_delay,
            ..Self::default()
        }
    }

    /// Give up after `attempts` consecutive failures.
    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Cap a single wait.
    #[must_use]
    pub const fn max_delay(mut self, delay: Option<Duration>) -> Self {
        self.max_delay = delay;
        self
    }

    /// Wait before the given attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let Some(exponent) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        self.max_delay.map_or(delay, |cap| delay.min(cap))
    }

    /// Whether `attempts` consecutive failures exhaust the policy.
    #[must_use]
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}
