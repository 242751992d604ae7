//! Successor resolution: which nodes run after `node` produced `output`.
//!
//! Pure and deterministic. Edges are evaluated in definition order:
//! - a conditional branch fires exactly one edge, the first whose condition
//!   matches, falling back to its first unconditioned edge;
//! - every other node fires all unconditioned edges plus every matching one.
//!
//! A node without edges (or without a firing edge) is terminal.

use serde_json::Value;

use crate::models::{NodeDefinition, NodeKind};

pub fn next_nodes(node: &NodeDefinition, output: &Value) -> Vec<String> {
    match node.kind() {
        NodeKind::Conditional => {
            let chosen = node
                .edges
                .iter()
                .find(|e| e.condition.as_ref().is_some_and(|c| c.evaluate(output)))
                .or_else(|| node.edges.iter().find(|e| e.condition.is_none()));
            chosen.map(|e| vec![e.target.clone()]).unwrap_or_default()
        }
        NodeKind::Task | NodeKind::ParallelGateway | NodeKind::JoinGateway => {
            let mut targets: Vec<String> = Vec::new();
            for edge in &node.edges {
                let fires = edge.condition.as_ref().map_or(true, |c| c.evaluate(output));
                if fires && !targets.contains(&edge.target) {
                    targets.push(edge.target.clone());
                }
            }
            targets
        }
    }
}
