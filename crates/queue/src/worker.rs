//! Worker loop: receives broker deliveries and runs them with bounded
//! concurrency until shut down.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::broker::{Broker, Delivery, TaskMessage};
use crate::{QueueError, TaskRunner};

/// Tuning knobs for a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Deliveries handled at the same time.
    pub concurrency: usize,
    /// How long one `receive` waits before checking for shutdown again.
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { concurrency: 4, poll_interval_ms: 500 }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

pub struct Worker {
    broker: Arc<dyn Broker>,
    runner: Arc<dyn TaskRunner>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(broker: Arc<dyn Broker>, runner: Arc<dyn TaskRunner>, config: WorkerConfig) -> Self {
        Self { broker, runner, config }
    }

    /// Process deliveries until `shutdown` is cancelled, then wait for the
    /// in-flight ones to finish.
    #[instrument(skip_all, fields(concurrency = self.config.concurrency))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), QueueError> {
        let concurrency = self.config.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        info!("worker started");

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => {
                    permit.map_err(|_| QueueError::Broker("worker semaphore closed".into()))?
                }
            };

            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.broker.receive(self.config.poll_interval()) => received,
            };

            let delivery = match received {
                Ok(Some(delivery)) => delivery,
                Ok(None) => continue,
                Err(e) => {
                    warn!("receive failed: {e}");
                    tokio::time::sleep(self.config.poll_interval()).await;
                    continue;
                }
            };

            let broker = self.broker.clone();
            let runner = self.runner.clone();
            tokio::spawn(async move {
                handle(broker.as_ref(), runner.as_ref(), delivery).await;
                drop(permit);
            });
        }

        info!("worker stopping; waiting for in-flight deliveries");
        let all = u32::try_from(concurrency).unwrap_or(u32::MAX);
        let _drained = permits
            .acquire_many(all)
            .await
            .map_err(|_| QueueError::Broker("worker semaphore closed".into()))?;
        info!("worker stopped");
        Ok(())
    }
}

async fn handle(broker: &dyn Broker, runner: &dyn TaskRunner, delivery: Delivery) {
    let message = match TaskMessage::decode(&delivery.payload) {
        Ok(message) => message,
        Err(e) => {
            // Redelivering an undecodable payload cannot help.
            error!(delivery_id = %delivery.id, "dropping malformed delivery: {e}");
            if let Err(e) = broker.ack(&delivery).await {
                warn!(delivery_id = %delivery.id, "ack failed: {e}");
            }
            return;
        }
    };

    let task_id = message.task.task_id;
    debug!(%task_id, attempts = delivery.attempts, "delivery received");

    let settled = match runner.run_one(task_id).await {
        Ok(()) => broker.ack(&delivery).await,
        Err(e) => {
            error!(%task_id, "run_one failed: {e:#}");
            broker.nack(&delivery).await
        }
    };

    if let Err(e) = settled {
        warn!(%task_id, delivery_id = %delivery.id, "could not settle delivery: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelBroker;
    use crate::{broker::BrokerQueue, TaskQueue, TaskRef};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Uuid>>,
        fail_first: Mutex<bool>,
    }

    #[async_trait]
    impl TaskRunner for Recorder {
        async fn run_one(&self, task_id: Uuid) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(task_id);
            let mut fail = self.fail_first.lock().unwrap();
            if *fail {
                *fail = false;
                anyhow::bail!("store unavailable");
            }
            Ok(())
        }

        async fn abort_execution(&self, _id: Uuid, _reason: String) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig { concurrency: 2, poll_interval_ms: 10 }
    }

    async fn wait_for(recorder: &Recorder, n: usize) {
        for _ in 0..200 {
            if recorder.seen.lock().unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("runner saw fewer than {n} deliveries");
    }

    #[tokio::test]
    async fn published_tasks_reach_the_runner() {
        let broker = Arc::new(ChannelBroker::default());
        let recorder = Arc::new(Recorder::default());
        let queue = BrokerQueue::new(broker.clone());

        let tasks: Vec<TaskRef> = (0..3)
            .map(|_| TaskRef { task_id: Uuid::new_v4(), workflow_execution_id: Uuid::new_v4() })
            .collect();
        for task in &tasks {
            queue.enqueue(*task).await.unwrap();
        }

        let shutdown = CancellationToken::new();
        let worker = Worker::new(broker, recorder.clone(), config());
        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { worker.run(shutdown).await }
        });

        wait_for(&recorder, 3).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        let mut seen = recorder.seen.lock().unwrap().clone();
        let mut expected: Vec<Uuid> = tasks.iter().map(|t| t.task_id).collect();
        seen.sort();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn runner_failure_is_redelivered() {
        let broker = Arc::new(ChannelBroker::default());
        let recorder = Arc::new(Recorder { fail_first: Mutex::new(true), ..Default::default() });
        let task_id = Uuid::new_v4();
        BrokerQueue::new(broker.clone())
            .enqueue(TaskRef { task_id, workflow_execution_id: Uuid::new_v4() })
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let worker = Worker::new(broker, recorder.clone(), config());
        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { worker.run(shutdown).await }
        });

        wait_for(&recorder, 2).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), vec![task_id, task_id]);
    }
}
