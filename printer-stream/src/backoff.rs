//! Exponential reconnect backoff.
//!
//! Tracks consecutive failed or lost connection attempts and hands out the
//! delay before the next one:
//!
//! - After failure 1: `base_delay`
//! - After failure 2: `base_delay * 2`
//! - After failure n: `min(base_delay * 2^(n-1), max_delay)`
//!
//! The first connection attempt counts as a failure like any reconnect.
//! Once `max_attempts` consecutive failures have been recorded without
//! reaching `Ready` no further delay is handed out and the caller gives up.

use std::time::Duration;

use crate::config::ReconnectPolicy;

/// Reconnect attempt counter plus delay schedule
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay for a zero based attempt index, capped at `max_delay`
    pub fn delay_for(policy: &ReconnectPolicy, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| policy.base_delay.checked_mul(factor))
            .map_or(policy.max_delay, |delay| delay.min(policy.max_delay))
    }

    /// Record a failed or lost attempt and schedule the next one
    ///
    /// Returns the delay to wait, or `None` once the budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt += 1;
        if self.is_exhausted() {
            return None;
        }
        Some(Self::delay_for(&self.policy, self.attempt - 1))
    }

    /// Consecutive failures recorded since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.policy.max_attempts
    }

    /// Forget past failures (called once a connection reaches `Ready`)
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
