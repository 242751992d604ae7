//! Definition catalog: workflows are validated once at registration and
//! looked up by id at run time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tracing::info;
use uuid::Uuid;

use crate::dag::validate_dag;
use crate::dispatch::HandlerRegistry;
use crate::models::{NodeDefinition, NodeKind, WorkflowDefinition};
use crate::EngineError;

/// A validated definition plus the graph facts the coordinator needs.
#[derive(Debug)]
pub struct CompiledWorkflow {
    pub definition: WorkflowDefinition,
    /// Topological order (cycle members last for re-entrant workflows).
    pub order: Vec<String>,
    in_degree: HashMap<String, u32>,
    entry: Vec<String>,
}

impl CompiledWorkflow {
    /// Validate `definition` against the graph rules and `registry`.
    pub fn compile(
        definition: WorkflowDefinition,
        registry: &HandlerRegistry,
    ) -> Result<Self, EngineError> {
        let order = validate_dag(&definition)?;

        if let Some(node) = definition.nodes.iter().find(|n| !registry.contains(&n.node_type)) {
            return Err(EngineError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
            });
        }

        // Distinct predecessors: several edges from one node to the same
        // target still deliver a single arrival.
        let mut in_degree: HashMap<String, u32> =
            definition.nodes.iter().map(|n| (n.id.clone(), 0)).collect();
        for node in &definition.nodes {
            let targets: HashSet<&str> = node.edges.iter().map(|e| e.target.as_str()).collect();
            for target in targets {
                *in_degree.entry(target.to_owned()).or_insert(0) += 1;
            }
        }
        let entry = definition.entry_nodes();

        Ok(Self { definition, order, in_degree, entry })
    }

    pub fn id(&self) -> Uuid {
        self.definition.id
    }

    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.definition.node(id)
    }

    pub fn in_degree(&self, id: &str) -> u32 {
        self.in_degree.get(id).copied().unwrap_or(0)
    }

    /// Whether `id` has to wait for several predecessors before running.
    pub fn is_join(&self, id: &str) -> bool {
        self.node(id).is_some_and(|n| n.kind() == NodeKind::JoinGateway) && self.in_degree(id) > 1
    }

    pub fn entry_nodes(&self) -> &[String] {
        &self.entry
    }

    pub fn allows_reentry(&self) -> bool {
        self.definition.allow_reentry
    }
}

/// Registered workflow definitions, keyed by id.
pub struct WorkflowCatalog {
    registry: Arc<HandlerRegistry>,
    workflows: RwLock<HashMap<Uuid, Arc<CompiledWorkflow>>>,
}

impl WorkflowCatalog {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry, workflows: RwLock::new(HashMap::new()) }
    }

    /// Validate and store `definition`, replacing any earlier version with
    /// the same id.
    pub fn register(&self, definition: WorkflowDefinition) -> Result<Arc<CompiledWorkflow>, EngineError> {
        let compiled = Arc::new(CompiledWorkflow::compile(definition, &self.registry)?);
        info!(
            workflow_id = %compiled.id(),
            name = %compiled.definition.name,
            nodes = compiled.definition.nodes.len(),
            "workflow registered"
        );
        self.workflows
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(compiled.id(), compiled.clone());
        Ok(compiled)
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<CompiledWorkflow>, EngineError> {
        self.workflows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
            .ok_or(EngineError::UnknownWorkflow(id))
    }

    pub fn list(&self) -> Vec<Arc<CompiledWorkflow>> {
        self.workflows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }
}
