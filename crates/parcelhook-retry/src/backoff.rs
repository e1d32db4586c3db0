//! Exponential backoff scheduling for failed callbacks.
//!
//! The delay before attempt `n` is `backoff_seconds * 2^(n - 1)`. There is no
//! jitter, so records that fail together become due together.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RetryError};

/// Exponent cap. 2^30 times any sane base is already centuries.
const MAX_EXPONENT: u32 = 30;

/// Retry budget and schedule for failed callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Failed replays after which a record is dead-lettered.
    pub max_attempts: u32,

    /// Base delay in seconds, doubled on every attempt.
    pub backoff_seconds: u64,

    /// Whether transient ingress failures are enqueued at all.
    pub enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, backoff_seconds: 60, enabled: true }
    }
}

impl RetryPolicy {
    /// Checks that the budget and base delay are usable.
    ///
    /// # Errors
    ///
    /// Returns `RetryError::InvalidPolicy` if either value is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(RetryError::invalid_policy("max_attempts must be greater than 0"));
        }
        if self.backoff_seconds == 0 {
            return Err(RetryError::invalid_policy("backoff_seconds must be greater than 0"));
        }
        Ok(())
    }

    /// Returns true if one more failure on a record with `attempts` failed
    /// replays spends the budget.
    pub fn exhausted_after_failure(&self, attempts: u32) -> bool {
        attempts.saturating_add(1) >= self.max_attempts
    }

    /// Deadline for `attempt` measured from `now`.
    pub fn next_retry_at(&self, now: DateTime<Utc>, attempt: u32) -> DateTime<Utc> {
        next_retry_at(now, attempt, self.backoff_seconds)
    }
}

/// Delay before the 1-indexed `attempt`.
///
/// An `attempt` of 0 is treated as 1 and the result saturates instead of
/// overflowing.
pub fn backoff_delay(attempt: u32, backoff_seconds: u64) -> Duration {
    let exponent = attempt.max(1).saturating_sub(1).min(MAX_EXPONENT);
    Duration::from_secs(backoff_seconds.saturating_mul(1_u64 << exponent))
}

/// Deadline for `attempt` measured from `now`.
pub fn next_retry_at(now: DateTime<Utc>, attempt: u32, backoff_seconds: u64) -> DateTime<Utc> {
    let delay = chrono::Duration::from_std(backoff_delay(attempt, backoff_seconds))
        .unwrap_or(chrono::Duration::MAX);
    now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Deadline for `attempt` measured from the wall clock.
pub fn compute_next_retry_at(attempt: u32, backoff_seconds: u64) -> DateTime<Utc> {
    next_retry_at(Utc::now(), attempt, backoff_seconds)
}
