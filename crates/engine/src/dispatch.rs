//! Node-type dispatch: maps a node's `type` tag to its registered handler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nodes::builtin::{self, ConditionalNode, JoinGatewayNode, ParallelGatewayNode, TaskNode};
use nodes::{ExecutionContext, ExecutionError, NodeHandler};
use serde_json::Value;
use tracing::debug;

use crate::models::NodeDefinition;

/// Explicit handler registry. Built once, handed to the engine, never global.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the control-flow handlers already in place.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(builtin::TASK, TaskNode);
        registry.register(builtin::CONDITIONAL_BRANCH, ConditionalNode);
        registry.register(builtin::PARALLEL_GATEWAY, ParallelGatewayNode);
        registry.register(builtin::JOIN_GATEWAY, JoinGatewayNode);
        registry
    }

    /// Register (or replace) the handler for `node_type`.
    pub fn register<H>(&mut self, node_type: impl Into<String>, handler: H) -> &mut Self
    where
        H: NodeHandler + 'static,
    {
        self.handlers.insert(node_type.into(), Arc::new(handler));
        self
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.handlers.contains_key(node_type)
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(node_type).cloned()
    }

    /// Run the handler for `node` with the node's config and `input`.
    ///
    /// An unregistered type is a permanent failure; running past `timeout`
    /// is a transient one.
    pub async fn execute(
        &self,
        node: &NodeDefinition,
        input: Value,
        ctx: &ExecutionContext,
        timeout: Option<Duration>,
    ) -> Result<Value, ExecutionError> {
        let handler = self.get(&node.node_type).ok_or_else(|| {
            ExecutionError::permanent(format!(
                "no handler registered for node type '{}'",
                node.node_type
            ))
        })?;

        debug!(node_id = %node.id, node_type = %node.node_type, "dispatching");
        let call = handler.execute(&node.config, input, ctx);
        match timeout {
            None => call.await,
            Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                Err(ExecutionError::transient(format!("handler timed out after {limit:?}")))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nodes::mock::MockNode;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx(node_id: &str) -> ExecutionContext {
        ExecutionContext {
            workflow_definition_id: Uuid::new_v4(),
            workflow_execution_id: Uuid::new_v4(),
            task_execution_id: Uuid::new_v4(),
            node_id: node_id.into(),
            attempt: 0,
        }
    }

    struct Sleepy;

    #[async_trait]
    impl NodeHandler for Sleepy {
        async fn execute(
            &self,
            _config: &Value,
            input: Value,
            _ctx: &ExecutionContext,
        ) -> Result<Value, ExecutionError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(input)
        }
    }

    #[tokio::test]
    async fn routes_by_node_type() {
        let mock = MockNode::returning(json!({ "ok": true }));
        let mut registry = HandlerRegistry::with_builtins();
        registry.register("ai_model_inference", mock.clone());

        let node = NodeDefinition::new("infer", "ai_model_inference");
        let out = registry.execute(&node, json!({}), &ctx("infer"), None).await.unwrap();

        assert_eq!(out, json!({ "ok": true }));
        assert_eq!(mock.calls_for("infer").len(), 1);
    }

    #[tokio::test]
    async fn builtin_task_returns_configured_output() {
        let registry = HandlerRegistry::with_builtins();
        let node = NodeDefinition::new("t", "task").with_config(json!({ "output": { "n": 1 } }));
        let out = registry.execute(&node, json!({}), &ctx("t"), None).await.unwrap();
        assert_eq!(out, json!({ "n": 1 }));
    }

    #[tokio::test]
    async fn unknown_type_is_permanent() {
        let registry = HandlerRegistry::new();
        let node = NodeDefinition::new("x", "nope");
        let err = registry.execute(&node, json!({}), &ctx("x"), None).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_transient() {
        let mut registry = HandlerRegistry::new();
        registry.register("slow", Sleepy);
        let node = NodeDefinition::new("s", "slow");

        let err = registry
            .execute(&node, json!({}), &ctx("s"), Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(err.message().contains("timed out"));
    }
}
