//! In-process broker over a tokio channel.
//!
//! Lets the asynchronous path (publish → worker pool → `run_one`) run inside
//! one process: for local runs and for exercising worker concurrency in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::error;
use uuid::Uuid;

use crate::broker::{Broker, Delivery};
use crate::QueueError;

/// Default number of deliveries before a nacked message is dropped.
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

pub struct ChannelBroker {
    tx: mpsc::UnboundedSender<Delivery>,
    rx: Mutex<mpsc::UnboundedReceiver<Delivery>>,
    max_deliveries: u32,
    dead_lettered: AtomicUsize,
}

impl Default for ChannelBroker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DELIVERIES)
    }
}

impl ChannelBroker {
    pub fn new(max_deliveries: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            max_deliveries,
            dead_lettered: AtomicUsize::new(0),
        }
    }

    /// Messages dropped after exhausting their deliveries.
    pub fn dead_lettered(&self) -> usize {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    fn send(&self, delivery: Delivery, delay: Duration) -> Result<(), QueueError> {
        if delay.is_zero() {
            return self
                .tx
                .send(delivery)
                .map_err(|_| QueueError::Broker("channel closed".into()));
        }

        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(delivery).is_err() {
                error!("channel closed before delayed delivery");
            }
        });
        Ok(())
    }
}

#[async_trait]
impl Broker for ChannelBroker {
    async fn publish(&self, payload: Value, delay: Duration) -> Result<(), QueueError> {
        self.send(Delivery { id: Uuid::new_v4(), payload, attempts: 0 }, delay)
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(wait, rx.recv()).await {
            Ok(Some(mut delivery)) => {
                delivery.attempts += 1;
                Ok(Some(delivery))
            }
            Ok(None) => Err(QueueError::Broker("channel closed".into())),
            Err(_) => Ok(None),
        }
    }

    async fn ack(&self, _delivery: &Delivery) -> Result<(), QueueError> {
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        if delivery.attempts >= self.max_deliveries {
            self.dead_lettered.fetch_add(1, Ordering::Relaxed);
            error!(delivery_id = %delivery.id, attempts = delivery.attempts, "delivery dead-lettered");
            return Ok(());
        }
        self.send(delivery.clone(), Duration::ZERO)
    }
}
