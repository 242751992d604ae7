//! Broker backed by the `job_queue` table.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use db::repository::jobs;
use db::DbPool;
use serde_json::Value;

use crate::broker::{Broker, Delivery};
use crate::QueueError;

pub struct PgBroker {
    pool: DbPool,
    max_attempts: i32,
    redelivery_delay: Duration,
}

impl PgBroker {
    pub fn new(pool: DbPool) -> Self {
        Self { pool, max_attempts: 5, redelivery_delay: Duration::from_secs(5) }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }
}

fn later(delay: Duration) -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
}

#[async_trait]
impl Broker for PgBroker {
    async fn publish(&self, payload: Value, delay: Duration) -> Result<(), QueueError> {
        jobs::enqueue_job(&self.pool, payload, later(delay), self.max_attempts).await?;
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        match jobs::fetch_next_job(&self.pool).await? {
            Some(job) => Ok(Some(Delivery {
                id: job.id,
                payload: job.payload,
                // `fetch_next_job` returns the row as it was before the claim.
                attempts: u32::try_from(job.attempts + 1).unwrap_or(u32::MAX),
            })),
            None => {
                tokio::time::sleep(wait).await;
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        jobs::complete_job(&self.pool, delivery.id).await?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        jobs::fail_job(&self.pool, delivery.id, later(self.redelivery_delay)).await?;
        Ok(())
    }
}
