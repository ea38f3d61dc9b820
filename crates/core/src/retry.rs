//! Re-attempt policy for failing engine invocations.
//!
//! One policy covers every job type. Only transient failures consume the
//! attempt budget; a permanent failure gives up immediately.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::JobType;

/// Default number of engine invocations per job, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the second attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Default upper bound on any single backoff.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    /// Process could not start, timed out, or was killed by the system.
    Transient,
    /// Malformed configuration or invalid input. Retrying cannot help.
    Permanent,
}

/// Outcome of [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

/// Capped exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total invocations allowed, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Policy for `job_type`, derived from `base`.
    ///
    /// Every job type currently shares the same budget and backoff; the
    /// hook exists so a type can be tuned without touching callers.
    pub fn for_job_type(_job_type: JobType, base: &RetryPolicy) -> RetryPolicy {
        base.clone()
    }

    /// Backoff after the failed `attempt` (1-based): `base * 2^(attempt-1)`,
    /// clamped to `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decide what happens after attempt number `attempt` (1-based) failed
    /// with `class`.
    pub fn decide(&self, attempt: u32, class: FailureClass) -> RetryDecision {
        match class {
            FailureClass::Permanent => RetryDecision::GiveUp,
            FailureClass::Transient if attempt >= self.max_attempts => RetryDecision::GiveUp,
            FailureClass::Transient => RetryDecision::Retry {
                delay: self.delay_for_attempt(attempt),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
