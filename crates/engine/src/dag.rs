//! DAG validation: run this before registering or executing a workflow.
//!
//! Rules enforced:
//! 1. Node IDs must be unique within the workflow.
//! 2. Every edge target and declared start node must be a valid node ID, and
//!    no start node may be declared twice.
//! 3. There must be at least one start node.
//! 4. The directed graph must be acyclic (topological sort must succeed),
//!    unless the workflow allows re-entry.
//!
//! Returns a topologically-sorted list of node IDs on success. For a
//! re-entrant workflow with cycles, nodes on a cycle are appended in
//! definition order.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{models::WorkflowDefinition, EngineError};

/// Validate the workflow's DAG and return nodes in topological order.
///
/// # Errors
/// - [`EngineError::DuplicateNodeId`] if two nodes share an ID.
/// - [`EngineError::UnknownNodeReference`] if an edge or start node references a missing node.
/// - [`EngineError::DuplicateStartNode`] if a start node is listed more than once.
/// - [`EngineError::NoStartNodes`] if execution has nowhere to begin.
/// - [`EngineError::CycleDetected`] if the graph is not acyclic and re-entry is off.
pub fn validate_dag(workflow: &WorkflowDefinition) -> Result<Vec<String>, EngineError> {
    // -----------------------------------------------------------------------
    // 1. Ensure node IDs are unique
    // -----------------------------------------------------------------------
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &workflow.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(EngineError::DuplicateNodeId(node.id.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Validate edge targets and start nodes
    // -----------------------------------------------------------------------
    for node in &workflow.nodes {
        for edge in &node.edges {
            if !seen_ids.contains(edge.target.as_str()) {
                return Err(EngineError::UnknownNodeReference {
                    node_id: edge.target.clone(),
                    side: "edge target",
                });
            }
        }
    }
    let mut seen_starts: HashSet<&str> = HashSet::new();
    for start in &workflow.start_nodes {
        if !seen_ids.contains(start.as_str()) {
            return Err(EngineError::UnknownNodeReference {
                node_id: start.clone(),
                side: "start node",
            });
        }
        if !seen_starts.insert(start.as_str()) {
            return Err(EngineError::DuplicateStartNode(start.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 3. Something has to run first
    // -----------------------------------------------------------------------
    if workflow.entry_nodes().is_empty() {
        return Err(EngineError::NoStartNodes);
    }

    // -----------------------------------------------------------------------
    // 4. Topological sort (Kahn's algorithm), seeded in definition order
    // -----------------------------------------------------------------------
    let mut in_degree: HashMap<&str, usize> =
        workflow.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    for node in &workflow.nodes {
        for edge in &node.edges {
            *in_degree.entry(edge.target.as_str()).or_insert(0) += 1;
        }
    }

    let mut queue: VecDeque<&str> = workflow
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree[id] == 0)
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(workflow.nodes.len());

    while let Some(node_id) = queue.pop_front() {
        sorted.push(node_id.to_owned());

        if let Some(node) = workflow.node(node_id) {
            for edge in &node.edges {
                let deg = in_degree.entry(edge.target.as_str()).or_insert(0);
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(edge.target.as_str());
                }
            }
        }
    }

    // If we didn't visit every node the graph contains a cycle.
    if sorted.len() != workflow.nodes.len() {
        if !workflow.allow_reentry {
            return Err(EngineError::CycleDetected);
        }
        for node in &workflow.nodes {
            if !sorted.contains(&node.id) {
                sorted.push(node.id.clone());
            }
        }
    }

    Ok(sorted)
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edge, NodeDefinition};

    fn node(id: &str, targets: &[&str]) -> NodeDefinition {
        targets
            .iter()
            .fold(NodeDefinition::new(id, "task"), |n, t| n.with_edge(Edge::to(*t)))
    }

    #[test]
    fn valid_linear_dag_returns_sorted_order() {
        // A → B → C
        let workflow = WorkflowDefinition::new(
            "test",
            vec![node("a", &["b"]), node("b", &["c"]), node("c", &[])],
        );

        let sorted = validate_dag(&workflow).expect("should be valid");
        assert_eq!(sorted, vec!["a", "b", "c"]);
    }

    #[test]
    fn valid_diamond_dag() {
        //   A
        //  / \
        // B   C
        //  \ /
        //   D
        let workflow = WorkflowDefinition::new(
            "test",
            vec![
                node("a", &["b", "c"]),
                node("b", &["d"]),
                node("c", &["d"]),
                node("d", &[]),
            ],
        );

        let sorted = validate_dag(&workflow).expect("should be valid");
        assert_eq!(sorted, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let workflow = WorkflowDefinition::new("test", vec![node("a", &[]), node("a", &[])]);
        assert!(matches!(
            validate_dag(&workflow),
            Err(EngineError::DuplicateNodeId(id)) if id == "a"
        ));
    }

    #[test]
    fn edge_referencing_missing_node_is_rejected() {
        let workflow = WorkflowDefinition::new("test", vec![node("a", &["ghost"])]);
        assert!(matches!(
            validate_dag(&workflow),
            Err(EngineError::UnknownNodeReference { node_id, .. }) if node_id == "ghost"
        ));
    }

    #[test]
    fn unknown_start_node_is_rejected() {
        let workflow = WorkflowDefinition::new("test", vec![node("a", &[])]).starting_at(&["nope"]);
        assert!(matches!(
            validate_dag(&workflow),
            Err(EngineError::UnknownNodeReference { side: "start node", .. })
        ));
    }

    #[test]
    fn repeated_start_node_is_rejected() {
        let workflow = WorkflowDefinition::new("test", vec![node("a", &["b"]), node("b", &[])])
            .starting_at(&["a", "a"]);
        assert!(matches!(
            validate_dag(&workflow),
            Err(EngineError::DuplicateStartNode(id)) if id == "a"
        ));
    }

    #[test]
    fn cycle_is_detected() {
        // A → B → C → A  (cycle!)
        let workflow = WorkflowDefinition::new(
            "test",
            vec![node("a", &["b"]), node("b", &["c"]), node("c", &["a"])],
        )
        .starting_at(&["a"]);
        assert!(matches!(validate_dag(&workflow), Err(EngineError::CycleDetected)));
    }

    #[test]
    fn pure_cycle_without_start_has_no_entry() {
        let workflow = WorkflowDefinition::new("test", vec![node("a", &["b"]), node("b", &["a"])]);
        assert!(matches!(validate_dag(&workflow), Err(EngineError::NoStartNodes)));
    }

    #[test]
    fn reentrant_workflow_may_loop_back() {
        let workflow = WorkflowDefinition::new(
            "test",
            vec![node("start", &["work"]), node("work", &["check"]), node("check", &["work"])],
        )
        .allowing_reentry();

        let sorted = validate_dag(&workflow).expect("loop-back allowed");
        assert_eq!(sorted, vec!["start", "work", "check"]);
    }

    #[test]
    fn single_node_no_edges_is_valid() {
        let workflow = WorkflowDefinition::new("test", vec![node("solo", &[])]);
        let sorted = validate_dag(&workflow).expect("single node should be valid");
        assert_eq!(sorted, vec!["solo"]);
    }
}
