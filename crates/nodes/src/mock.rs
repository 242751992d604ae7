//! `MockNode`: a test double for `NodeHandler`.
//!
//! Useful in unit and integration tests where a real handler is either
//! unavailable or irrelevant. Clones share their call log and script, so a
//! test can register one clone and assert on another.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::{traits::ExecutionContext, ExecutionError, NodeHandler};

/// Behaviour injected into `MockNode` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Return the input unchanged.
    Echo,
    /// Fail with a `Transient` error.
    FailTransient(String),
    /// Fail with a `Permanent` error.
    FailPermanent(String),
}

/// A single recorded invocation.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub node_id: String,
    pub input: Value,
    pub attempt: u32,
}

/// A mock handler that records every call it receives and plays back a
/// script of outcomes. Once the script is used up, `fallback` applies.
#[derive(Clone)]
pub struct MockNode {
    script: Arc<Mutex<VecDeque<MockBehaviour>>>,
    fallback: MockBehaviour,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockNode {
    fn with(fallback: MockBehaviour) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(value: Value) -> Self {
        Self::with(MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that passes its input through.
    pub fn echo() -> Self {
        Self::with(MockBehaviour::Echo)
    }

    /// Create a mock that always fails with a `Permanent` error.
    pub fn failing_permanent(msg: impl Into<String>) -> Self {
        Self::with(MockBehaviour::FailPermanent(msg.into()))
    }

    /// Create a mock that always fails with a `Transient` error.
    pub fn failing_transient(msg: impl Into<String>) -> Self {
        Self::with(MockBehaviour::FailTransient(msg.into()))
    }

    /// Fail transiently `times` times, then behave like `self`.
    pub fn flaky(self, times: usize, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        {
            let mut script = self.script.lock().unwrap();
            for _ in 0..times {
                script.push_back(MockBehaviour::FailTransient(msg.clone()));
            }
        }
        self
    }

    /// Number of times this handler has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Every call seen so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls made for one node id (a mock can back several nodes).
    pub fn calls_for(&self, node_id: &str) -> Vec<MockCall> {
        self.calls().into_iter().filter(|c| c.node_id == node_id).collect()
    }
}

#[async_trait]
impl NodeHandler for MockNode {
    async fn execute(
        &self,
        _config: &Value,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, ExecutionError> {
        self.calls.lock().unwrap().push(MockCall {
            node_id: ctx.node_id.clone(),
            input: input.clone(),
            attempt: ctx.attempt,
        });

        let behaviour = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match behaviour {
            MockBehaviour::ReturnValue(v) => Ok(v),
            MockBehaviour::Echo => Ok(input),
            MockBehaviour::FailTransient(msg) => Err(ExecutionError::Transient(msg)),
            MockBehaviour::FailPermanent(msg) => Err(ExecutionError::Permanent(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[tokio::test]
    async fn flaky_mock_plays_script_then_fallback() {
        let node = MockNode::returning(json!({ "ok": true })).flaky(2, "blip");
        let handle = node.clone();

        for _ in 0..2 {
            let err = node.execute(&Value::Null, json!({}), &ctx("a")).await.unwrap_err();
            assert!(err.is_transient());
        }
        let out = node.execute(&Value::Null, json!({}), &ctx("a")).await.unwrap();
        assert_eq!(out, json!({ "ok": true }));

        // Clones share the call log.
        assert_eq!(handle.call_count(), 3);
        assert_eq!(handle.calls_for("a").len(), 3);
        assert!(handle.calls_for("b").is_empty());
    }
}
