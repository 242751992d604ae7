//! Workflow execution repository functions.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{ExecutionStatus, WorkflowExecution, WorkflowExecutionRow},
    DbError,
};

/// Insert a new workflow execution record.
pub async fn create_execution(pool: &PgPool, execution: &WorkflowExecution) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_executions
            (id, workflow_definition_id, triggered_by, status, input, error, created_at, ended_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(execution.id)
    .bind(execution.workflow_definition_id)
    .bind(&execution.triggered_by)
    .bind(execution.status.to_string())
    .bind(&execution.input)
    .bind(&execution.error)
    .bind(execution.created_at)
    .bind(execution.ended_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch a single execution by its primary key.
pub async fn get_execution(pool: &PgPool, id: Uuid) -> Result<WorkflowExecution, DbError> {
    let row: WorkflowExecutionRow = sqlx::query_as(
        r#"
        SELECT id, workflow_definition_id, triggered_by, status, input, error, created_at, ended_at
        FROM workflow_executions
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DbError::execution_not_found(id))?;

    row.try_into()
}

/// Conditionally move an execution to `next`.
///
/// `ended_at` is stamped when `next` is terminal; `error` is only written
/// when supplied.
pub async fn transition_execution(
    pool: &PgPool,
    id: Uuid,
    expected: ExecutionStatus,
    next: ExecutionStatus,
    error: Option<String>,
) -> Result<bool, DbError> {
    let ended_at = next.is_terminal().then(Utc::now);

    let result = sqlx::query(
        r#"
        UPDATE workflow_executions
        SET status = $3,
            error = COALESCE($4, error),
            ended_at = COALESCE($5, ended_at)
        WHERE id = $1 AND status = $2
        "#,
    )
    .bind(id)
    .bind(expected.to_string())
    .bind(next.to_string())
    .bind(error)
    .bind(ended_at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(true);
    }

    // Distinguish a lost race from an unknown id.
    get_execution(pool, id).await.map(|_| false)
}
