//! Reconnection backoff and per-channel attempt counters.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::config::ReconnectSettings;

/// Exponential backoff that stops growing at a fixed attempt limit and
/// then retries forever at the maximum delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect.
    pub base_delay: Duration,
    /// Attempt count at which the delay stops growing.
    pub attempt_limit: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectSettings::default())
    }
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.base_delay_ms),
            attempt_limit: settings.attempt_limit.max(1),
        }
    }
}

impl ReconnectPolicy {
    /// Delay to use when `attempts` failures have already been counted.
    ///
    /// `base * 2^attempts` while `attempts < limit`, otherwise
    /// `base * 2^(limit - 1)`.
    #[must_use]
    pub fn delay_for_attempts(&self, attempts: u32) -> Duration {
        calculate_backoff(attempts, self.base_delay, self.attempt_limit)
    }

    /// Largest delay this policy produces.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.delay_for_attempts(self.attempt_limit)
    }
}

/// Calculate the reconnect delay after `attempts` counted failures.
#[must_use]
pub fn calculate_backoff(attempts: u32, base_delay: Duration, attempt_limit: u32) -> Duration {
    let exponent = attempts.min(attempt_limit.max(1) - 1);
    base_delay.saturating_mul(2u32.saturating_pow(exponent))
}

/// Attempt counter for one channel kind.
///
/// Bumped on every failure-triggered reschedule and cleared only when the
/// channel reaches `Open`.
#[derive(Debug, Default)]
pub struct ReconnectCounter {
    attempts: AtomicU32,
    scheduled: AtomicU64,
}

impl ReconnectCounter {
    /// Create a counter at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            attempts: AtomicU32::new(0),
            scheduled: AtomicU64::new(0),
        }
    }

    /// Current attempt count.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Total reconnects scheduled over the counter's lifetime; never reset.
    #[must_use]
    pub fn scheduled(&self) -> u64 {
        self.scheduled.load(Ordering::SeqCst)
    }

    /// Count one reschedule, returning the attempt count before it.
    pub fn record_reschedule(&self) -> u32 {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        self.attempts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_add(1)))
            .unwrap_or_else(|n| n)
    }

    /// Clear the attempt count after a successful open.
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }
}
