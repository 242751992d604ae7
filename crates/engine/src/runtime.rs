//! `Engine` wires the coordinator to one of the two queue implementations.
//!
//! `EngineConfig::synchronous` is the only switch: `true` gives a
//! [`DrainQueue`] that replays executions in-process, `false` a
//! [`BrokerQueue`] served by [`Worker`]s. The coordinator is identical in
//! both cases.

use std::sync::Arc;

use db::{ExecutionStore, WorkflowExecution};
use queue::{Broker, BrokerQueue, ChannelBroker, DrainQueue, DrainReport, QueueError, TaskQueue, TaskRunner, Worker};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{CompiledWorkflow, WorkflowCatalog};
use crate::config::EngineConfig;
use crate::coordinator::{Coordinator, EngineContext, ExecutionSnapshot};
use crate::dispatch::HandlerRegistry;
use crate::models::WorkflowDefinition;
use crate::EngineError;

enum Dispatch {
    Drain(Arc<DrainQueue>),
    Broker(Arc<BrokerQueue>),
}

pub struct Engine {
    coordinator: Arc<Coordinator>,
    dispatch: Dispatch,
    config: EngineConfig,
}

impl Engine {
    /// Build an engine. In asynchronous mode tasks travel through an
    /// in-process [`ChannelBroker`].
    pub fn new(store: Arc<dyn ExecutionStore>, registry: HandlerRegistry, config: EngineConfig) -> Self {
        Self::build(store, registry, config, None)
    }

    /// Like [`Engine::new`], publishing to `broker` when the configuration
    /// selects asynchronous mode.
    pub fn with_broker(
        store: Arc<dyn ExecutionStore>,
        registry: HandlerRegistry,
        config: EngineConfig,
        broker: Arc<dyn Broker>,
    ) -> Self {
        Self::build(store, registry, config, Some(broker))
    }

    fn build(
        store: Arc<dyn ExecutionStore>,
        registry: HandlerRegistry,
        config: EngineConfig,
        broker: Option<Arc<dyn Broker>>,
    ) -> Self {
        let registry = Arc::new(registry);
        let catalog = Arc::new(WorkflowCatalog::new(registry.clone()));

        let (dispatch, queue): (Dispatch, Arc<dyn TaskQueue>) = if config.synchronous {
            let drain = Arc::new(DrainQueue::new(store.clone()));
            let queue: Arc<dyn TaskQueue> = drain.clone();
            (Dispatch::Drain(drain), queue)
        } else {
            let broker: Arc<dyn Broker> = match broker {
                Some(broker) => broker,
                None => Arc::new(ChannelBroker::default()),
            };
            let broker_queue = Arc::new(BrokerQueue::new(broker));
            let queue: Arc<dyn TaskQueue> = broker_queue.clone();
            (Dispatch::Broker(broker_queue), queue)
        };

        let ctx = EngineContext {
            store,
            catalog,
            registry,
            queue,
            config: config.clone(),
        };
        info!(synchronous = config.synchronous, "engine ready");

        Self { coordinator: Arc::new(Coordinator::new(ctx)), dispatch, config }
    }

    pub fn register(&self, definition: WorkflowDefinition) -> Result<Arc<CompiledWorkflow>, EngineError> {
        self.coordinator.context().catalog.register(definition)
    }

    pub async fn trigger(
        &self,
        workflow_id: Uuid,
        actor: Option<String>,
        input: Value,
    ) -> Result<WorkflowExecution, EngineError> {
        self.coordinator.trigger(workflow_id, actor, input).await
    }

    /// Replay `execution_id` in-process until nothing is scheduled.
    pub async fn drain(&self, execution_id: Uuid) -> Result<DrainReport, EngineError> {
        match &self.dispatch {
            Dispatch::Drain(queue) => Ok(queue
                .drain_all(self.coordinator.as_ref(), execution_id, self.config.drain.max_iterations)
                .await?),
            Dispatch::Broker(_) => Err(EngineError::NotSynchronous),
        }
    }

    /// A worker pulling from this engine's broker.
    pub fn worker(&self) -> Result<Worker, EngineError> {
        match &self.dispatch {
            Dispatch::Broker(queue) => {
                let runner: Arc<dyn TaskRunner> = self.coordinator.clone();
                Ok(Worker::new(queue.broker(), runner, self.config.worker.clone()))
            }
            Dispatch::Drain(_) => Err(EngineError::NoBroker),
        }
    }

    /// Trigger a run and drive it until the execution is terminal.
    ///
    /// Drain exhaustion is not an error here: the execution is already
    /// failed, and the snapshot shows it. A broker-mode run that is still
    /// going after `run_timeout_secs` is failed and reported as
    /// [`EngineError::RunTimedOut`].
    pub async fn run_to_completion(
        &self,
        workflow_id: Uuid,
        actor: Option<String>,
        input: Value,
    ) -> Result<ExecutionSnapshot, EngineError> {
        let execution = self.trigger(workflow_id, actor, input).await?;

        match &self.dispatch {
            Dispatch::Drain(_) => match self.drain(execution.id).await {
                Ok(_) | Err(EngineError::Queue(QueueError::DrainExhausted { .. })) => {}
                Err(e) => return Err(e),
            },
            Dispatch::Broker(_) => {
                let worker = self.worker()?;
                let shutdown = CancellationToken::new();
                let token = shutdown.clone();
                let handle = tokio::spawn(async move { worker.run(token).await });

                let store = &self.coordinator.context().store;
                let limit = self.config.run_timeout();
                let finished = tokio::time::timeout(limit, async {
                    while !store.get_execution(execution.id).await?.status.is_terminal() {
                        tokio::time::sleep(self.config.worker.poll_interval()).await;
                    }
                    Ok::<(), EngineError>(())
                })
                .await;

                shutdown.cancel();
                match handle.await {
                    Ok(result) => result?,
                    Err(e) => warn!("worker task ended abnormally: {e}"),
                }

                match finished {
                    Ok(polled) => polled?,
                    Err(_) => {
                        let reason = format!("execution did not finish within {limit:?}");
                        warn!(execution_id = %execution.id, "{reason}");
                        self.coordinator.abort(execution.id, &reason).await?;
                        return Err(EngineError::RunTimedOut { execution_id: execution.id, limit });
                    }
                }
            }
        }

        self.inspect(execution.id).await
    }

    pub async fn inspect(&self, execution_id: Uuid) -> Result<ExecutionSnapshot, EngineError> {
        self.coordinator.inspect(execution_id).await
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        self.coordinator.clone()
    }

    pub fn store(&self) -> Arc<dyn ExecutionStore> {
        self.coordinator.context().store.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The drain queue, when running synchronously.
    pub fn drain_queue(&self) -> Option<Arc<DrainQueue>> {
        match &self.dispatch {
            Dispatch::Drain(queue) => Some(queue.clone()),
            Dispatch::Broker(_) => None,
        }
    }
}
