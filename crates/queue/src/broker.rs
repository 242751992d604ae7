//! Asynchronous dispatch through a message broker.
//!
//! [`BrokerQueue`] serializes a [`TaskMessage`] and publishes it; a
//! [`Worker`](crate::worker::Worker) on the other side receives deliveries and
//! runs them. Delivery is at-least-once: a message can arrive twice, and the
//! runner's compare-and-set absorbs the duplicate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::{QueueError, TaskQueue, TaskRef};

/// Wire form of an enqueued task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task: TaskRef,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskMessage {
    pub fn new(task: TaskRef) -> Self {
        Self { task, enqueued_at: Utc::now() }
    }

    pub fn encode(&self) -> Result<Value, QueueError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn decode(payload: &Value) -> Result<Self, QueueError> {
        Ok(serde_json::from_value(payload.clone())?)
    }
}

/// A message handed out by a broker, to be acked or nacked.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: Uuid,
    pub payload: Value,
    /// Times this message has been delivered, including this one.
    pub attempts: u32,
}

/// Transport contract. The payload is opaque to the broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Make `payload` deliverable once `delay` has elapsed. Returns promptly.
    async fn publish(&self, payload: Value, delay: Duration) -> Result<(), QueueError>;

    /// Next due delivery, waiting up to `wait` for one to show up.
    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    /// The delivery was handled; never deliver it again.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Handling failed; deliver it again later (or dead-letter it).
    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError>;
}

/// The asynchronous [`TaskQueue`]: fire-and-forget into a broker.
pub struct BrokerQueue {
    broker: Arc<dyn Broker>,
}

impl BrokerQueue {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> Arc<dyn Broker> {
        self.broker.clone()
    }
}

#[async_trait]
impl TaskQueue for BrokerQueue {
    async fn enqueue_after(&self, task: TaskRef, delay: Duration) -> Result<(), QueueError> {
        let payload = TaskMessage::new(task).encode()?;
        self.broker.publish(payload, delay).await?;
        debug!(task_id = %task.task_id, ?delay, "task published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn garbage_payload_is_a_serialization_error() {
        let err = TaskMessage::decode(&json!({ "nope": true })).unwrap_err();
        assert!(matches!(err, QueueError::Serialization(_)));
    }

    #[test]
    fn message_carries_both_ids() {
        let task = TaskRef { task_id: Uuid::new_v4(), workflow_execution_id: Uuid::new_v4() };
        let payload = TaskMessage::new(task).encode().unwrap();
        assert_eq!(payload["task"]["task_id"], json!(task.task_id.to_string()));
        assert_eq!(TaskMessage::decode(&payload).unwrap().task, task);
    }
}
