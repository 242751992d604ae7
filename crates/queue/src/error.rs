//! Queue-level error type.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The synchronous drain hit its iteration bound with work still pending.
    #[error(
        "drain of execution {execution_id} exhausted after {iterations} iterations; \
         still scheduled: {pending:?}"
    )]
    DrainExhausted {
        execution_id: Uuid,
        iterations: usize,
        pending: Vec<Uuid>,
    },

    #[error("could not encode or decode task message: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The broker transport refused the operation.
    #[error("broker error: {0}")]
    Broker(String),

    #[error("store error: {0}")]
    Store(#[from] db::DbError),

    /// The task runner surfaced a fault (e.g. a record that should exist is missing).
    #[error(transparent)]
    Runner(#[from] anyhow::Error),
}
