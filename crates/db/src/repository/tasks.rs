//! Task execution repository functions.
//!
//! Status changes are single conditional `UPDATE … WHERE status = $expected`
//! statements, so Postgres row locking provides the compare-and-set.

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{TaskExecution, TaskExecutionRow, TaskStatus, TaskUpdate},
    DbError,
};

const TASK_COLUMNS: &str = "id, workflow_execution_id, node_id, visit, status, attempt_count, \
     arrivals, input_data, output_data, error, scheduled_for, created_at, started_at, ended_at";

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn decode_all(rows: Vec<TaskExecutionRow>) -> Result<Vec<TaskExecution>, DbError> {
    rows.into_iter().map(TaskExecution::try_from).collect()
}

/// Insert a task unless one already exists for the same visit of the node.
pub async fn create_task(pool: &PgPool, task: &TaskExecution) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        INSERT INTO task_executions
            (id, workflow_execution_id, node_id, visit, status, attempt_count, arrivals,
             input_data, output_data, error, scheduled_for, created_at, started_at, ended_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (workflow_execution_id, node_id, visit) DO NOTHING
        "#,
    )
    .bind(task.id)
    .bind(task.workflow_execution_id)
    .bind(&task.node_id)
    .bind(to_i32(task.visit))
    .bind(task.status.to_string())
    .bind(to_i32(task.attempt_count))
    .bind(to_i32(task.arrivals))
    .bind(&task.input_data)
    .bind(&task.output_data)
    .bind(&task.error)
    .bind(task.scheduled_for)
    .bind(task.created_at)
    .bind(task.started_at)
    .bind(task.ended_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn get_task(pool: &PgPool, id: Uuid) -> Result<TaskExecution, DbError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM task_executions WHERE id = $1");
    let row: TaskExecutionRow = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::task_not_found(id))?;

    row.try_into()
}

pub async fn find_task(
    pool: &PgPool,
    workflow_execution_id: Uuid,
    node_id: &str,
    visit: u32,
) -> Result<Option<TaskExecution>, DbError> {
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM task_executions \
         WHERE workflow_execution_id = $1 AND node_id = $2 AND visit = $3"
    );
    let row: Option<TaskExecutionRow> = sqlx::query_as(&sql)
        .bind(workflow_execution_id)
        .bind(node_id)
        .bind(to_i32(visit))
        .fetch_optional(pool)
        .await?;

    row.map(TaskExecution::try_from).transpose()
}

/// Apply `update` if the task is still in `expected`.
pub async fn transition(
    pool: &PgPool,
    id: Uuid,
    expected: TaskStatus,
    update: &TaskUpdate,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE task_executions
        SET status        = $3,
            output_data   = COALESCE($4, output_data),
            error         = COALESCE($5, error),
            attempt_count = COALESCE($6, attempt_count),
            scheduled_for = COALESCE($7, scheduled_for),
            started_at    = COALESCE($8, started_at),
            ended_at      = COALESCE($9, ended_at)
        WHERE id = $1 AND status = $2
        "#,
    )
    .bind(id)
    .bind(expected.to_string())
    .bind(update.status.to_string())
    .bind(&update.output_data)
    .bind(&update.error)
    .bind(update.attempt_count.map(to_i32))
    .bind(update.scheduled_for)
    .bind(update.started_at)
    .bind(update.ended_at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(true);
    }

    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM task_executions WHERE id = $1)")
        .bind(id)
        .fetch_one(pool)
        .await?;

    if exists {
        Ok(false)
    } else {
        Err(DbError::task_not_found(id))
    }
}

/// Merge a predecessor's output into a join task and count the arrival.
pub async fn record_arrival(
    pool: &PgPool,
    id: Uuid,
    predecessor: &str,
    output: &Value,
) -> Result<u32, DbError> {
    let arrivals: Option<i32> = sqlx::query_scalar(
        r#"
        UPDATE task_executions
        SET input_data = CASE jsonb_typeof(input_data)
                             WHEN 'object' THEN input_data
                             ELSE '{}'::jsonb
                         END || jsonb_build_object($2::text, $3::jsonb),
            arrivals   = arrivals + 1
        WHERE id = $1
        RETURNING arrivals
        "#,
    )
    .bind(id)
    .bind(predecessor)
    .bind(output)
    .fetch_optional(pool)
    .await?;

    let arrivals = arrivals.ok_or_else(|| DbError::task_not_found(id))?;
    u32::try_from(arrivals).map_err(|_| DbError::Decode(format!("negative arrivals: {arrivals}")))
}

pub async fn query(
    pool: &PgPool,
    workflow_execution_id: Uuid,
    status: TaskStatus,
) -> Result<Vec<TaskExecution>, DbError> {
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM task_executions \
         WHERE workflow_execution_id = $1 AND status = $2 \
         ORDER BY created_at ASC"
    );
    let rows: Vec<TaskExecutionRow> = sqlx::query_as(&sql)
        .bind(workflow_execution_id)
        .bind(status.to_string())
        .fetch_all(pool)
        .await?;

    decode_all(rows)
}

pub async fn list_tasks(
    pool: &PgPool,
    workflow_execution_id: Uuid,
) -> Result<Vec<TaskExecution>, DbError> {
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM task_executions \
         WHERE workflow_execution_id = $1 \
         ORDER BY created_at ASC"
    );
    let rows: Vec<TaskExecutionRow> = sqlx::query_as(&sql)
        .bind(workflow_execution_id)
        .fetch_all(pool)
        .await?;

    decode_all(rows)
}
