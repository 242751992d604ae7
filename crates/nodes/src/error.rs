//! Node-level error type.

use thiserror::Error;

/// Errors returned by a handler's `execute` method.
///
/// The coordinator hands the variant to the retry policy:
/// - `Transient`: the task is rescheduled while retries remain.
/// - `Permanent`: the task and its workflow execution fail immediately.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// Temporary failure; another attempt may succeed.
    #[error("transient node error: {0}")]
    Transient(String),

    /// Permanent failure; no retry should be attempted.
    #[error("permanent node error: {0}")]
    Permanent(String),
}

impl ExecutionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// The only signal the retry policy consumes.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(msg) | Self::Permanent(msg) => msg,
        }
    }
}
