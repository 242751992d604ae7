//! Job queue repository functions.
//!
//! The Postgres broker is backed by the `job_queue` table. Workers poll the
//! table and use `SELECT … FOR UPDATE SKIP LOCKED` for safe concurrent
//! processing.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::JobRow, DbError};

/// Enqueue a new job that becomes visible at `available_at`.
///
/// `payload` is arbitrary JSON that the worker hands back to the engine.
pub async fn enqueue_job(
    pool: &PgPool,
    payload: serde_json::Value,
    available_at: DateTime<Utc>,
    max_attempts: i32,
) -> Result<JobRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as(
        r#"
        INSERT INTO job_queue
            (id, status, attempts, max_attempts, payload, available_at, created_at, updated_at)
        VALUES ($1, 'pending', 0, $2, $3, $4, $5, $5)
        RETURNING id, status, attempts, max_attempts, payload, available_at, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(max_attempts)
    .bind(payload)
    .bind(available_at)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Atomically fetch the oldest due job and mark it as `processing`.
///
/// Uses `SELECT … FOR UPDATE SKIP LOCKED` so multiple workers can poll
/// safely without stepping on each other.
///
/// Returns `None` if no pending job is due.
pub async fn fetch_next_job(pool: &PgPool) -> Result<Option<JobRow>, DbError> {
    let mut tx = pool.begin().await?;

    let row: Option<JobRow> = sqlx::query_as(
        r#"
        SELECT id, status, attempts, max_attempts, payload, available_at, created_at, updated_at
        FROM job_queue
        WHERE status = 'pending' AND available_at <= $1
        ORDER BY available_at ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(Utc::now())
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(ref job) = row {
        sqlx::query(
            r#"
            UPDATE job_queue
            SET status = 'processing', attempts = attempts + 1, updated_at = $1
            WHERE id = $2
            "#,
        )
        .bind(Utc::now())
        .bind(job.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
    } else {
        tx.rollback().await?;
    }

    Ok(row)
}

/// Mark a job as completed.
pub async fn complete_job(pool: &PgPool, job_id: Uuid) -> Result<(), DbError> {
    sqlx::query("UPDATE job_queue SET status = 'completed', updated_at = $1 WHERE id = $2")
        .bind(Utc::now())
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Return a job to `pending` (visible again at `retry_at`), or dead-letter it
/// once its own `max_attempts` is reached.
pub async fn fail_job(pool: &PgPool, job_id: Uuid, retry_at: DateTime<Utc>) -> Result<(), DbError> {
    sqlx::query(
        r#"
        UPDATE job_queue
        SET status = CASE WHEN attempts >= max_attempts THEN 'dead_lettered' ELSE 'pending' END,
            available_at = $1,
            updated_at = $2
        WHERE id = $3
        "#,
    )
    .bind(retry_at)
    .bind(Utc::now())
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}
