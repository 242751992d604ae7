//! In-process `ExecutionStore`.
//!
//! Everything sits behind one mutex, which makes every trait method atomic.
//! Used by the synchronous drain mode, by the CLI's local runs and by tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    models::{ExecutionStatus, TaskExecution, TaskStatus, TaskUpdate, WorkflowExecution},
    store::ExecutionStore,
    DbError,
};

#[derive(Default)]
struct Inner {
    executions: HashMap<Uuid, WorkflowExecution>,
    tasks: HashMap<Uuid, TaskExecution>,
    /// Insertion order per execution, so queries come back oldest first.
    order: HashMap<Uuid, Vec<Uuid>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means another caller panicked mid-test; the
        // maps themselves are never left half-written.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tasks_of(inner: &Inner, workflow_execution_id: Uuid) -> Vec<TaskExecution> {
        inner
            .order
            .get(&workflow_execution_id)
            .map(|ids| ids.iter().filter_map(|id| inner.tasks.get(id).cloned()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), DbError> {
        let mut inner = self.lock();
        inner.executions.insert(execution.id, execution.clone());
        inner.order.entry(execution.id).or_default();
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecution, DbError> {
        self.lock()
            .executions
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::execution_not_found(id))
    }

    async fn transition_execution(
        &self,
        id: Uuid,
        expected: ExecutionStatus,
        next: ExecutionStatus,
        error: Option<String>,
    ) -> Result<bool, DbError> {
        let mut inner = self.lock();
        let execution = inner
            .executions
            .get_mut(&id)
            .ok_or_else(|| DbError::execution_not_found(id))?;

        if execution.status != expected {
            return Ok(false);
        }
        execution.status = next;
        if error.is_some() {
            execution.error = error;
        }
        if next.is_terminal() {
            execution.ended_at = Some(Utc::now());
        }
        Ok(true)
    }

    async fn create_task(&self, task: &TaskExecution) -> Result<bool, DbError> {
        let mut inner = self.lock();
        if !inner.executions.contains_key(&task.workflow_execution_id) {
            return Err(DbError::execution_not_found(task.workflow_execution_id));
        }

        let duplicate = Self::tasks_of(&inner, task.workflow_execution_id)
            .iter()
            .any(|t| t.node_id == task.node_id && t.visit == task.visit);
        if duplicate {
            return Ok(false);
        }

        inner.tasks.insert(task.id, task.clone());
        inner.order.entry(task.workflow_execution_id).or_default().push(task.id);
        Ok(true)
    }

    async fn get_task(&self, id: Uuid) -> Result<TaskExecution, DbError> {
        self.lock()
            .tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::task_not_found(id))
    }

    async fn find_task(
        &self,
        workflow_execution_id: Uuid,
        node_id: &str,
        visit: u32,
    ) -> Result<Option<TaskExecution>, DbError> {
        let inner = self.lock();
        Ok(Self::tasks_of(&inner, workflow_execution_id)
            .into_iter()
            .find(|t| t.node_id == node_id && t.visit == visit))
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: TaskStatus,
        update: &TaskUpdate,
    ) -> Result<bool, DbError> {
        let mut inner = self.lock();
        let task = inner.tasks.get_mut(&id).ok_or_else(|| DbError::task_not_found(id))?;

        if task.status != expected {
            return Ok(false);
        }
        task.apply(update);
        Ok(true)
    }

    async fn record_arrival(
        &self,
        id: Uuid,
        predecessor: &str,
        output: &Value,
    ) -> Result<u32, DbError> {
        let mut inner = self.lock();
        let task = inner.tasks.get_mut(&id).ok_or_else(|| DbError::task_not_found(id))?;

        if !task.input_data.is_object() {
            task.input_data = Value::Object(Default::default());
        }
        if let Some(map) = task.input_data.as_object_mut() {
            map.insert(predecessor.to_owned(), output.clone());
        }
        task.arrivals += 1;
        Ok(task.arrivals)
    }

    async fn query(
        &self,
        workflow_execution_id: Uuid,
        status: TaskStatus,
    ) -> Result<Vec<TaskExecution>, DbError> {
        let inner = self.lock();
        Ok(Self::tasks_of(&inner, workflow_execution_id)
            .into_iter()
            .filter(|t| t.status == status)
            .collect())
    }

    async fn list_tasks(&self, workflow_execution_id: Uuid) -> Result<Vec<TaskExecution>, DbError> {
        let inner = self.lock();
        Ok(Self::tasks_of(&inner, workflow_execution_id))
    }
}
