//! Failure handling policy.
//!
//! Transient failures retry with capped exponential backoff until the
//! attempt budget is spent; permanent failures (corrupt input, model
//! rejection) fail the task immediately. Both escalation paths mark the
//! task PermanentlyFailed, which the orchestrator propagates to the
//! rest of the failing segment only.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stage::StageFailure;

/// What the coordinator should do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultDecision {
    /// Put the task back in Pending with a not-before delay.
    RetryAfter(Duration),
    /// Mark the task PermanentlyFailed.
    FailNow(String),
}

/// Retry policy for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total execution attempts allowed per task.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff for the first retry (milliseconds); doubles per attempt.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Backoff ceiling (milliseconds).
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    2000 // 2 seconds
}

fn default_backoff_cap() -> u64 {
    120_000 // 2 minutes
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_cap_ms: default_backoff_cap(),
        }
    }
}

impl RetryPolicy {
    /// Decide the fate of a task whose `completed_attempts`-th attempt
    /// just failed (1-indexed).
    pub fn decide(&self, failure: &StageFailure, completed_attempts: u32) -> FaultDecision {
        match failure {
            StageFailure::Permanent(reason) => FaultDecision::FailNow(reason.clone()),
            StageFailure::Transient(reason) => {
                if completed_attempts >= self.max_attempts {
                    FaultDecision::FailNow(format!(
                        "retries exhausted after {} attempts: {}",
                        completed_attempts, reason
                    ))
                } else {
                    FaultDecision::RetryAfter(self.backoff(completed_attempts))
                }
            }
        }
    }

    /// Delay before the retry following the n-th failed attempt
    /// (1-indexed): `base * 2^(n-1)`, capped.
    pub fn backoff(&self, completed_attempts: u32) -> Duration {
        let exponent = completed_attempts.saturating_sub(1).min(63);
        let ms = self
            .backoff_base_ms
            .checked_shl(exponent)
            .unwrap_or(self.backoff_cap_ms)
            .min(self.backoff_cap_ms);
        Duration::from_millis(ms)
    }
}
