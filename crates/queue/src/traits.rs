//! The queue seams: what the coordinator enqueues into and what a queue
//! calls back into.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::QueueError;

/// Reference to a scheduled task. This is all that ever travels through a
/// queue; the record itself stays in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRef {
    pub task_id: Uuid,
    pub workflow_execution_id: Uuid,
}

/// Hands scheduled tasks to whatever will eventually run them.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Schedule `task` to be run no earlier than `delay` from now.
    async fn enqueue_after(&self, task: TaskRef, delay: Duration) -> Result<(), QueueError>;

    async fn enqueue(&self, task: TaskRef) -> Result<(), QueueError> {
        self.enqueue_after(task, Duration::ZERO).await
    }
}

/// The single-task execution protocol, as seen from a queue.
///
/// Implemented by the engine's coordinator. `run_one` must tolerate being
/// called more than once for the same task.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_one(&self, task_id: Uuid) -> anyhow::Result<()>;

    /// Fail a whole execution from outside the protocol (drain exhaustion).
    async fn abort_execution(&self, workflow_execution_id: Uuid, reason: String) -> anyhow::Result<()>;
}
