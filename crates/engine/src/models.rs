//! Workflow definition types.
//!
//! A definition is authored elsewhere and only read by the engine. It
//! deserializes from JSON such as:
//!
//! ```json
//! { "name": "review", "start_nodes": ["classify"],
//!   "nodes": [
//!     { "id": "classify", "type": "conditional_branch",
//!       "config": { "condition": { "op": "truthy", "path": "urgent" } },
//!       "edges": [ { "condition": { "op": "truthy", "path": "condition_met" }, "target": "page" },
//!                  { "target": "queue" } ] },
//!     { "id": "page", "type": "task" },
//!     { "id": "queue", "type": "task" } ] }
//! ```

use chrono::{DateTime, Utc};
use nodes::builtin;
use nodes::Condition;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// NodeKind
// ---------------------------------------------------------------------------

/// Routing behaviour implied by a node's type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Any handler-backed work node; every matching edge fires.
    Task,
    /// Exactly one outgoing edge fires.
    Conditional,
    /// Every matching edge fires.
    ParallelGateway,
    /// Waits for all of its predecessors before running.
    JoinGateway,
}

impl NodeKind {
    pub fn of(node_type: &str) -> Self {
        match node_type {
            builtin::CONDITIONAL_BRANCH => Self::Conditional,
            builtin::PARALLEL_GATEWAY => Self::ParallelGateway,
            builtin::JOIN_GATEWAY => Self::JoinGateway,
            _ => Self::Task,
        }
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Directed edge to `target`, optionally guarded by a condition on the
/// source node's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    pub target: String,
}

impl Edge {
    pub fn to(target: impl Into<String>) -> Self {
        Self { condition: None, target: target.into() }
    }

    pub fn when(condition: Condition, target: impl Into<String>) -> Self {
        Self { condition: Some(condition), target: target.into() }
    }
}

// ---------------------------------------------------------------------------
// NodeDefinition
// ---------------------------------------------------------------------------

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique identifier within this workflow (referenced by edges).
    pub id: String,
    /// Maps to a registered `NodeHandler`.
    #[serde(rename = "type", alias = "node_type")]
    pub node_type: String,
    /// Arbitrary configuration passed to the handler at execution time.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Outgoing edges, evaluated in order.
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Overrides the engine-wide retry policy for this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl NodeDefinition {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config: serde_json::Value::Null,
            edges: Vec::new(),
            retry: None,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn kind(&self) -> NodeKind {
        NodeKind::of(&self.node_type)
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A complete, immutable workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    pub nodes: Vec<NodeDefinition>,
    /// Where execution begins. When empty, every node without incoming
    /// edges is a start node.
    #[serde(default)]
    pub start_nodes: Vec<String>,
    /// Permit loop-back edges; each revisit creates a fresh task record.
    /// Every arrival at a plain node counts as a revisit, so a node where
    /// parallel branches meet should be a `join_gateway`.
    #[serde(default)]
    pub allow_reentry: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Convenience constructor for testing.
    pub fn new(name: impl Into<String>, nodes: Vec<NodeDefinition>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            nodes,
            start_nodes: Vec::new(),
            allow_reentry: false,
            created_at: Utc::now(),
        }
    }

    pub fn starting_at(mut self, start_nodes: &[&str]) -> Self {
        self.start_nodes = start_nodes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn allowing_reentry(mut self) -> Self {
        self.allow_reentry = true;
        self
    }

    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Declared start nodes, or the nodes nothing points at.
    pub fn entry_nodes(&self) -> Vec<String> {
        if !self.start_nodes.is_empty() {
            return self.start_nodes.clone();
        }
        self.nodes
            .iter()
            .filter(|n| {
                !self
                    .nodes
                    .iter()
                    .flat_map(|other| other.edges.iter())
                    .any(|e| e.target == n.id)
            })
            .map(|n| n.id.clone())
            .collect()
    }
}
