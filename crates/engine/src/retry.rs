//! Retry policy: turns a failed attempt into "try again later" or "give up".

use std::time::Duration;

use nodes::ExecutionError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Every retry waits `base_delay_secs`.
    Fixed,
    /// Retry `n` (0-based) waits `base_delay_secs * 2^n`, capped at `max_delay_secs`.
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub backoff: Backoff,
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 60,
            backoff: Backoff::Fixed,
            max_delay_secs: 3600,
        }
    }
}

/// Why a failure is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    NonTransient,
    RetriesExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Fail(TerminalReason),
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    /// `attempt_count` is the number of retries already scheduled for the task.
    pub fn should_retry(&self, attempt_count: u32, error: &ExecutionError) -> RetryDecision {
        if !error.is_transient() {
            return RetryDecision::Fail(TerminalReason::NonTransient);
        }
        if attempt_count >= self.max_retries {
            return RetryDecision::Fail(TerminalReason::RetriesExceeded);
        }
        RetryDecision::Retry { delay: self.delay_for(attempt_count) }
    }

    pub fn delay_for(&self, attempt_count: u32) -> Duration {
        let secs = match self.backoff {
            Backoff::Fixed => self.base_delay_secs,
            Backoff::Exponential => self
                .base_delay_secs
                .saturating_mul(2u64.saturating_pow(attempt_count)),
        };
        Duration::from_secs(secs.min(self.max_delay_secs))
    }
}
