//! Postgres connection pool and the `PgStore` built on it.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::{
    models::{ExecutionStatus, TaskExecution, TaskStatus, TaskUpdate, WorkflowExecution},
    repository::{executions, tasks},
    store::ExecutionStore,
    DbError,
};

/// Type alias for the shared Postgres pool used across the whole application.
pub type DbPool = PgPool;

/// Create a new connection pool from the given `database_url`.
///
/// `max_connections` controls the pool ceiling.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, DbError> {
    info!("Connecting to database (max_connections={})", max_connections);
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run embedded SQLx migrations located in `./migrations` (relative to the
/// workspace root at build time).
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    info!("Running database migrations");
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed [`ExecutionStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl ExecutionStore for PgStore {
    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), DbError> {
        executions::create_execution(&self.pool, execution).await
    }

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecution, DbError> {
        executions::get_execution(&self.pool, id).await
    }

    async fn transition_execution(
        &self,
        id: Uuid,
        expected: ExecutionStatus,
        next: ExecutionStatus,
        error: Option<String>,
    ) -> Result<bool, DbError> {
        executions::transition_execution(&self.pool, id, expected, next, error).await
    }

    async fn create_task(&self, task: &TaskExecution) -> Result<bool, DbError> {
        tasks::create_task(&self.pool, task).await
    }

    async fn get_task(&self, id: Uuid) -> Result<TaskExecution, DbError> {
        tasks::get_task(&self.pool, id).await
    }

    async fn find_task(
        &self,
        workflow_execution_id: Uuid,
        node_id: &str,
        visit: u32,
    ) -> Result<Option<TaskExecution>, DbError> {
        tasks::find_task(&self.pool, workflow_execution_id, node_id, visit).await
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: TaskStatus,
        update: &TaskUpdate,
    ) -> Result<bool, DbError> {
        tasks::transition(&self.pool, id, expected, update).await
    }

    async fn record_arrival(
        &self,
        id: Uuid,
        predecessor: &str,
        output: &Value,
    ) -> Result<u32, DbError> {
        tasks::record_arrival(&self.pool, id, predecessor, output).await
    }

    async fn query(
        &self,
        workflow_execution_id: Uuid,
        status: TaskStatus,
    ) -> Result<Vec<TaskExecution>, DbError> {
        tasks::query(&self.pool, workflow_execution_id, status).await
    }

    async fn list_tasks(&self, workflow_execution_id: Uuid) -> Result<Vec<TaskExecution>, DbError> {
        tasks::list_tasks(&self.pool, workflow_execution_id).await
    }
}
