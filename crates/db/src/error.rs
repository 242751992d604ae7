//! Typed error type for the db crate.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored value could not be mapped back onto a domain type.
    #[error("decode error: {0}")]
    Decode(String),
}

impl DbError {
    pub fn execution_not_found(id: Uuid) -> Self {
        Self::NotFound { entity: "workflow execution", id }
    }

    pub fn task_not_found(id: Uuid) -> Self {
        Self::NotFound { entity: "task execution", id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
