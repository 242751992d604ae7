//! `db` crate: pure persistence layer.
//!
//! Provides the execution record models, the [`ExecutionStore`] contract with
//! an in-memory and a Postgres implementation, and the job-queue repository
//! used by the Postgres broker. No orchestration logic lives here.

pub mod error;
pub mod memory;
pub mod models;
pub mod pool;
pub mod repository;
pub mod store;

pub use error::DbError;
pub use memory::MemoryStore;
pub use models::{ExecutionStatus, TaskExecution, TaskStatus, TaskUpdate, WorkflowExecution};
pub use pool::{DbPool, PgStore};
pub use store::ExecutionStore;
