//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the workflow engine (validation + execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge or start-node list references a node ID that doesn't exist.
    #[error("{side} references unknown node '{node_id}'")]
    UnknownNodeReference {
        node_id: String,
        side: &'static str,
    },

    /// The same node is listed twice in `start_nodes`.
    #[error("start node '{0}' is listed more than once")]
    DuplicateStartNode(String),

    /// Topological sort detected a cycle in a workflow that forbids re-entry.
    #[error("workflow graph contains a cycle")]
    CycleDetected,

    /// No start node was declared and every node has an incoming edge.
    #[error("workflow has no start node")]
    NoStartNodes,

    /// A node's type has no registered handler.
    #[error("node '{node_id}' has unregistered type '{node_type}'")]
    UnknownNodeType {
        node_id: String,
        node_type: String,
    },

    // ------ Lookup errors ------

    #[error("workflow definition {0} is not registered")]
    UnknownWorkflow(Uuid),

    /// A task points at a node its workflow does not define.
    #[error("workflow {workflow_id} has no node '{node_id}'")]
    UnknownNode {
        workflow_id: Uuid,
        node_id: String,
    },

    // ------ Task failures (recorded on the task, never returned from `run_one`) ------

    /// A node failed with a non-transient error.
    #[error("node '{node_id}' failed fatally: {message}")]
    NodeFatal {
        node_id: String,
        message: String,
    },

    /// A node kept failing transiently until its retries ran out.
    #[error("node '{node_id}' exceeded retry limit after {attempts} attempts: {message}")]
    NodeRetryExhausted {
        node_id: String,
        attempts: u32,
        message: String,
    },

    // ------ Runtime errors ------

    /// Draining was requested from an engine running in broker mode.
    #[error("engine is not running in synchronous mode")]
    NotSynchronous,

    /// A worker was requested from an engine running in drain mode.
    #[error("engine has no broker; it runs in synchronous mode")]
    NoBroker,

    /// A broker-mode run did not reach a terminal state in time.
    #[error("execution {execution_id} did not finish within {limit:?}")]
    RunTimedOut {
        execution_id: Uuid,
        limit: std::time::Duration,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    #[error("queue error: {0}")]
    Queue(#[from] queue::QueueError),
}
