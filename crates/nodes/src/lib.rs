//! `nodes` crate: the `NodeHandler` trait and built-in handlers.
//!
//! Every node type, built-in or application-provided, is a
//! [`NodeHandler`]. The engine dispatches execution through this trait object
//! and routes failures on [`ExecutionError::is_transient`].

pub mod builtin;
pub mod condition;
pub mod error;
pub mod mock;
pub mod traits;

pub use condition::Condition;
pub use error::ExecutionError;
pub use traits::{ExecutionContext, NodeHandler};
