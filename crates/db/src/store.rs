//! The `ExecutionStore` trait: the persistence contract the engine relies on.
//!
//! Status changes only ever go through [`ExecutionStore::transition`] (or
//! its [`ExecutionStore::compare_and_set_status`] shorthand). Implementations
//! must make the status check and the write one atomic step: two workers must
//! never both move the same task out of `Scheduled`.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    models::{ExecutionStatus, TaskExecution, TaskStatus, TaskUpdate, WorkflowExecution},
    DbError,
};

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    // ------ workflow executions ------

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), DbError>;

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecution, DbError>;

    /// Move an execution from `expected` to `next`, stamping `ended_at` when
    /// `next` is terminal. Returns `false` when the current status differs.
    async fn transition_execution(
        &self,
        id: Uuid,
        expected: ExecutionStatus,
        next: ExecutionStatus,
        error: Option<String>,
    ) -> Result<bool, DbError>;

    // ------ task executions ------

    /// Insert a task. Returns `false` (and writes nothing) when a task for the
    /// same `(workflow_execution_id, node_id, visit)` already exists.
    async fn create_task(&self, task: &TaskExecution) -> Result<bool, DbError>;

    async fn get_task(&self, id: Uuid) -> Result<TaskExecution, DbError>;

    async fn find_task(
        &self,
        workflow_execution_id: Uuid,
        node_id: &str,
        visit: u32,
    ) -> Result<Option<TaskExecution>, DbError>;

    /// Atomically apply `update` if the task is currently in `expected`.
    ///
    /// Returns `Ok(false)` on a status mismatch ("already claimed") and
    /// `DbError::NotFound` for an unknown id.
    async fn transition(
        &self,
        id: Uuid,
        expected: TaskStatus,
        update: &TaskUpdate,
    ) -> Result<bool, DbError>;

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: TaskStatus,
        next: TaskStatus,
    ) -> Result<bool, DbError> {
        self.transition(id, expected, &TaskUpdate::to(next)).await
    }

    /// Merge `output` into the task input under `predecessor` and bump the
    /// arrival counter in one step. Returns the new counter value.
    async fn record_arrival(
        &self,
        id: Uuid,
        predecessor: &str,
        output: &Value,
    ) -> Result<u32, DbError>;

    /// Tasks of one execution in the given status, oldest first.
    async fn query(
        &self,
        workflow_execution_id: Uuid,
        status: TaskStatus,
    ) -> Result<Vec<TaskExecution>, DbError>;

    /// Every task of one execution, oldest first.
    async fn list_tasks(&self, workflow_execution_id: Uuid) -> Result<Vec<TaskExecution>, DbError>;
}
