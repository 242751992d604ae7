//! `engine` crate: workflow definitions, DAG validation, and the execution
//! coordinator that drives tasks through either queue implementation.

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod dag;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod resolver;
pub mod retry;
pub mod runtime;

pub use catalog::{CompiledWorkflow, WorkflowCatalog};
pub use config::{DrainConfig, EngineConfig};
pub use coordinator::{Coordinator, EngineContext, ExecutionSnapshot, RunOutcome};
pub use dag::validate_dag;
pub use dispatch::HandlerRegistry;
pub use error::EngineError;
pub use models::{Edge, NodeDefinition, NodeKind, WorkflowDefinition};
pub use retry::{Backoff, RetryDecision, RetryPolicy};
pub use runtime::Engine;
