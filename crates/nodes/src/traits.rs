//! The `NodeHandler` trait: the contract every node type must fulfil.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::ExecutionError;

/// Identifiers of the task a handler is running for.
///
/// Defined here (in the nodes crate) so both the engine and individual
/// handlers can import it without a circular dependency. Handlers get ids
/// only, never a handle to the record store.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// ID of the workflow definition being run.
    pub workflow_definition_id: Uuid,
    /// ID of the workflow execution the task belongs to.
    pub workflow_execution_id: Uuid,
    /// ID of the task execution record.
    pub task_execution_id: Uuid,
    /// Node being executed.
    pub node_id: String,
    /// Number of re-attempts that preceded this call (0 on the first run).
    pub attempt: u32,
}

/// The core handler trait.
///
/// One implementation is registered per node-type tag. Handlers receive the
/// node's static `config` plus the task's `input` and return the task output.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn execute(
        &self,
        config: &Value,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, ExecutionError>;
}
