//! Built-in control-flow handlers.
//!
//! Business handlers (model inference, scripts, HTTP calls, …) are
//! registered by the embedding application; the ones here only shape data
//! so that routing works out of the box.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{condition::Condition, traits::ExecutionContext, ExecutionError, NodeHandler};

pub const TASK: &str = "task";
pub const CONDITIONAL_BRANCH: &str = "conditional_branch";
pub const PARALLEL_GATEWAY: &str = "parallel_gateway";
pub const JOIN_GATEWAY: &str = "join_gateway";

/// Generic task: returns `config.output` when present, otherwise echoes the
/// input.
pub struct TaskNode;

#[async_trait]
impl NodeHandler for TaskNode {
    async fn execute(
        &self,
        config: &Value,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, ExecutionError> {
        debug!(node_id = %ctx.node_id, "generic task");
        Ok(config.get("output").cloned().unwrap_or(input))
    }
}

/// Evaluates `config.condition` against the input.
///
/// Output: `{ "condition_met": bool, "branch_taken": "true_path" | "false_path", "input": … }`,
/// so outgoing edges can route on `condition_met`.
pub struct ConditionalNode;

#[async_trait]
impl NodeHandler for ConditionalNode {
    async fn execute(
        &self,
        config: &Value,
        input: Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, ExecutionError> {
        let raw = config
            .get("condition")
            .cloned()
            .ok_or_else(|| ExecutionError::permanent("conditional_branch requires `config.condition`"))?;
        let condition: Condition = serde_json::from_value(raw)
            .map_err(|e| ExecutionError::permanent(format!("invalid condition: {e}")))?;

        let met = condition.evaluate(&input);
        Ok(json!({
            "condition_met": met,
            "branch_taken": if met { "true_path" } else { "false_path" },
            "input": input,
        }))
    }
}

/// Fan-out gateway. Branching happens in the resolver; the gateway passes
/// its input through so every branch sees the same data.
pub struct ParallelGatewayNode;

#[async_trait]
impl NodeHandler for ParallelGatewayNode {
    async fn execute(
        &self,
        _config: &Value,
        input: Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, ExecutionError> {
        Ok(input)
    }
}

/// Join gateway. By the time it runs, its input is an object keyed by
/// predecessor node id.
pub struct JoinGatewayNode;

#[async_trait]
impl NodeHandler for JoinGatewayNode {
    async fn execute(
        &self,
        _config: &Value,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, ExecutionError> {
        let branches = input.as_object().map_or(0, |o| o.len());
        debug!(node_id = %ctx.node_id, branches, "join released");
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            workflow_definition_id: Uuid::new_v4(),
            workflow_execution_id: Uuid::new_v4(),
            task_execution_id: Uuid::new_v4(),
            node_id: "n".into(),
            attempt: 0,
        }
    }

    #[tokio::test]
    async fn task_node_prefers_configured_output() {
        let out = TaskNode
            .execute(&json!({ "output": { "ok": true } }), json!({ "x": 1 }), &ctx())
            .await
            .unwrap();
        assert_eq!(out, json!({ "ok": true }));

        let echoed = TaskNode.execute(&Value::Null, json!({ "x": 1 }), &ctx()).await.unwrap();
        assert_eq!(echoed, json!({ "x": 1 }));
    }

    #[tokio::test]
    async fn conditional_node_reports_branch() {
        let config = json!({ "condition": { "op": "greater_than", "path": "score", "value": 0.5 } });
        let out = ConditionalNode.execute(&config, json!({ "score": 0.9 }), &ctx()).await.unwrap();
        assert_eq!(out["condition_met"], json!(true));
        assert_eq!(out["branch_taken"], json!("true_path"));
        assert_eq!(out["input"]["score"], json!(0.9));
    }

    #[tokio::test]
    async fn conditional_node_without_condition_is_permanent_failure() {
        let err = ConditionalNode.execute(&json!({}), json!({}), &ctx()).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
