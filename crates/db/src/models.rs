//! Execution records and the row structs that map onto database tables.
//!
//! The records carry no orchestration behaviour; the engine crate owns the
//! rules for when and how they change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// workflow_executions
// ---------------------------------------------------------------------------

/// Possible statuses for a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = DbError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running"   => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed"    => Ok(Self::Failed),
            other       => Err(DbError::Decode(format!("unknown execution status: {other}"))),
        }
    }
}

/// One triggered run of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_definition_id: Uuid,
    /// Actor that triggered the run, if the caller supplied one.
    pub triggered_by: Option<String>,
    pub status: ExecutionStatus,
    pub input: serde_json::Value,
    /// Workflow-level failure summary (drain exhaustion, stalled join, failed task).
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// A fresh execution in `Running` status.
    pub fn start(
        workflow_definition_id: Uuid,
        triggered_by: Option<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_definition_id,
            triggered_by,
            status: ExecutionStatus::Running,
            input,
            error: None,
            created_at: Utc::now(),
            ended_at: None,
        }
    }
}

/// A persisted workflow execution row.
#[derive(Debug, Clone, FromRow)]
pub struct WorkflowExecutionRow {
    pub id: Uuid,
    pub workflow_definition_id: Uuid,
    pub triggered_by: Option<String>,
    pub status: String,
    pub input: serde_json::Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TryFrom<WorkflowExecutionRow> for WorkflowExecution {
    type Error = DbError;

    fn try_from(row: WorkflowExecutionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            workflow_definition_id: row.workflow_definition_id,
            triggered_by: row.triggered_by,
            status: row.status.parse()?,
            input: row.input,
            error: row.error,
            created_at: row.created_at,
            ended_at: row.ended_at,
        })
    }
}

// ---------------------------------------------------------------------------
// task_executions
// ---------------------------------------------------------------------------

/// Possible statuses for a task execution.
///
/// `Waiting` is only used by join gateways that are still collecting
/// predecessor arrivals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Waiting,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting   => write!(f, "waiting"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Running   => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed    => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = DbError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting"   => Ok(Self::Waiting),
            "scheduled" => Ok(Self::Scheduled),
            "running"   => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed"    => Ok(Self::Failed),
            other       => Err(DbError::Decode(format!("unknown task status: {other}"))),
        }
    }
}

/// One node invocation inside a workflow execution. Retries reuse the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: Uuid,
    pub workflow_execution_id: Uuid,
    pub node_id: String,
    /// Visitation number; only grows above 0 for workflows that allow re-entry.
    pub visit: u32,
    pub status: TaskStatus,
    /// Re-attempts scheduled so far (0 on the first run).
    pub attempt_count: u32,
    /// Predecessor arrivals recorded by a join gateway.
    pub arrivals: u32,
    pub input_data: serde_json::Value,
    pub output_data: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Earliest time a delayed retry should be picked up.
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TaskExecution {
    /// A new record for `node_id` in the given initial status.
    pub fn new(
        workflow_execution_id: Uuid,
        node_id: impl Into<String>,
        visit: u32,
        status: TaskStatus,
        input_data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_execution_id,
            node_id: node_id.into(),
            visit,
            status,
            attempt_count: 0,
            arrivals: 0,
            input_data,
            output_data: None,
            error: None,
            scheduled_for: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Apply an update in place. Stores call this after the status check.
    pub fn apply(&mut self, update: &TaskUpdate) {
        self.status = update.status;
        if let Some(output) = &update.output_data {
            self.output_data = Some(output.clone());
        }
        if let Some(error) = &update.error {
            self.error = Some(error.clone());
        }
        if let Some(attempts) = update.attempt_count {
            self.attempt_count = attempts;
        }
        if let Some(at) = update.scheduled_for {
            self.scheduled_for = Some(at);
        }
        if let Some(at) = update.started_at {
            self.started_at = Some(at);
        }
        if let Some(at) = update.ended_at {
            self.ended_at = Some(at);
        }
    }
}

/// A status transition plus the fields written together with it.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    pub output_data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempt_count: Option<u32>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TaskUpdate {
    pub fn to(status: TaskStatus) -> Self {
        Self {
            status,
            output_data: None,
            error: None,
            attempt_count: None,
            scheduled_for: None,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn output(mut self, output: serde_json::Value) -> Self {
        self.output_data = Some(output);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn attempt_count(mut self, attempts: u32) -> Self {
        self.attempt_count = Some(attempts);
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    pub fn started_now(mut self) -> Self {
        self.started_at = Some(Utc::now());
        self
    }

    pub fn ended_now(mut self) -> Self {
        self.ended_at = Some(Utc::now());
        self
    }
}

/// A persisted task execution row.
#[derive(Debug, Clone, FromRow)]
pub struct TaskExecutionRow {
    pub id: Uuid,
    pub workflow_execution_id: Uuid,
    pub node_id: String,
    pub visit: i32,
    pub status: String,
    pub attempt_count: i32,
    pub arrivals: i32,
    pub input_data: serde_json::Value,
    pub output_data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

fn to_u32(field: &str, value: i32) -> Result<u32, DbError> {
    u32::try_from(value).map_err(|_| DbError::Decode(format!("negative {field}: {value}")))
}

impl TryFrom<TaskExecutionRow> for TaskExecution {
    type Error = DbError;

    fn try_from(row: TaskExecutionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            workflow_execution_id: row.workflow_execution_id,
            node_id: row.node_id,
            visit: to_u32("visit", row.visit)?,
            status: row.status.parse()?,
            attempt_count: to_u32("attempt_count", row.attempt_count)?,
            arrivals: to_u32("arrivals", row.arrivals)?,
            input_data: row.input_data,
            output_data: row.output_data,
            error: row.error,
            scheduled_for: row.scheduled_for,
            created_at: row.created_at,
            started_at: row.started_at,
            ended_at: row.ended_at,
        })
    }
}

// ---------------------------------------------------------------------------
// job_queue
// ---------------------------------------------------------------------------

/// Possible statuses for a queued job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    DeadLettered,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending      => write!(f, "pending"),
            Self::Processing   => write!(f, "processing"),
            Self::Completed    => write!(f, "completed"),
            Self::DeadLettered => write!(f, "dead_lettered"),
        }
    }
}

/// A job row fetched from the queue table. `payload` is the serialized task
/// reference; the table knows nothing else about it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub payload: serde_json::Value,
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
