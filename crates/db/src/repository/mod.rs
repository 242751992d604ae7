//! Repository functions: one function per database operation.
//!
//! Every function takes a `&PgPool` and returns a `Result<T, DbError>`.
//! No orchestration logic, only SQL.

pub mod executions;
pub mod jobs;
pub mod tasks;
