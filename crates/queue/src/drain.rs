//! Synchronous drain queue.
//!
//! `enqueue` only buffers the reference. [`DrainQueue::drain_all`] then
//! replays the execution in-process: each pass reads the `Scheduled` tasks of
//! the governing execution from the store and runs the ones this drain has
//! not processed yet, until nothing is scheduled or the iteration bound is
//! reached. The store, not the buffer, decides what runs.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use db::{ExecutionStore, TaskStatus};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::{QueueError, TaskQueue, TaskRef, TaskRunner};

/// Default safety bound against cyclic or misconfigured graphs.
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

/// A buffered `enqueue` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    pub task: TaskRef,
    pub delay: Duration,
}

/// Outcome of a successful drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Passes that found work to run.
    pub iterations: usize,
    /// `run_one` calls made.
    pub tasks_run: usize,
}

pub struct DrainQueue {
    store: Arc<dyn ExecutionStore>,
    pending: Mutex<Vec<Enqueued>>,
}

impl DrainQueue {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store, pending: Mutex::new(Vec::new()) }
    }

    /// Buffered references not yet consumed by a drain, in enqueue order.
    pub fn enqueued(&self) -> Vec<Enqueued> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn release(&self, execution_id: Uuid) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|e| e.task.workflow_execution_id != execution_id);
    }

    /// Run every scheduled task of `execution_id` to quiescence.
    ///
    /// A retried task comes back to `Scheduled` with a higher
    /// `attempt_count`, so "already processed" is tracked per attempt.
    /// Retry delays are not waited out.
    ///
    /// # Errors
    /// - [`QueueError::DrainExhausted`] when work is still scheduled after
    ///   `max_iterations` passes; the execution is aborted first.
    /// - [`QueueError::Runner`] / [`QueueError::Store`] for data-integrity faults.
    #[instrument(skip(self, runner), fields(execution_id = %execution_id))]
    pub async fn drain_all(
        &self,
        runner: &dyn TaskRunner,
        execution_id: Uuid,
        max_iterations: usize,
    ) -> Result<DrainReport, QueueError> {
        let mut processed: HashSet<(Uuid, u32)> = HashSet::new();
        let mut report = DrainReport { iterations: 0, tasks_run: 0 };

        loop {
            self.release(execution_id);
            let scheduled = self.store.query(execution_id, TaskStatus::Scheduled).await?;
            if scheduled.is_empty() {
                info!(
                    iterations = report.iterations,
                    tasks_run = report.tasks_run,
                    "drain finished"
                );
                return Ok(report);
            }

            if report.iterations >= max_iterations {
                let pending: Vec<Uuid> = scheduled.iter().map(|t| t.id).collect();
                error!(?pending, max_iterations, "drain exhausted with tasks still scheduled");
                runner
                    .abort_execution(
                        execution_id,
                        format!("drain exhausted after {max_iterations} iterations"),
                    )
                    .await?;
                return Err(QueueError::DrainExhausted {
                    execution_id,
                    iterations: report.iterations,
                    pending,
                });
            }

            report.iterations += 1;
            for task in scheduled {
                if !processed.insert((task.id, task.attempt_count)) {
                    continue;
                }
                debug!(task_id = %task.id, node_id = %task.node_id, "draining task");
                runner.run_one(task.id).await?;
                report.tasks_run += 1;
            }
        }
    }
}

#[async_trait]
impl TaskQueue for DrainQueue {
    async fn enqueue_after(&self, task: TaskRef, delay: Duration) -> Result<(), QueueError> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Enqueued { task, delay });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::{ExecutionStatus, MemoryStore, TaskExecution, TaskUpdate, WorkflowExecution};
    use serde_json::json;

    /// Completes each task and schedules the next link of a fixed chain.
    struct ChainRunner {
        store: Arc<MemoryStore>,
        chain: Vec<&'static str>,
    }

    #[async_trait]
    impl TaskRunner for ChainRunner {
        async fn run_one(&self, task_id: Uuid) -> anyhow::Result<()> {
            let task = self.store.get_task(task_id).await?;
            if !self
                .store
                .compare_and_set_status(task_id, TaskStatus::Scheduled, TaskStatus::Completed)
                .await?
            {
                return Ok(());
            }
            let pos = self.chain.iter().position(|n| *n == task.node_id).unwrap();
            if let Some(next) = self.chain.get(pos + 1) {
                let next = TaskExecution::new(
                    task.workflow_execution_id,
                    *next,
                    0,
                    TaskStatus::Scheduled,
                    json!({}),
                );
                self.store.create_task(&next).await?;
            }
            Ok(())
        }

        async fn abort_execution(&self, id: Uuid, reason: String) -> anyhow::Result<()> {
            self.store
                .transition_execution(id, ExecutionStatus::Running, ExecutionStatus::Failed, Some(reason))
                .await?;
            Ok(())
        }
    }

    /// Reschedules every task forever, like a misconfigured loop.
    struct SpinningRunner {
        store: Arc<MemoryStore>,
    }

    #[async_trait]
    impl TaskRunner for SpinningRunner {
        async fn run_one(&self, task_id: Uuid) -> anyhow::Result<()> {
            let task = self.store.get_task(task_id).await?;
            self.store
                .transition(
                    task_id,
                    TaskStatus::Scheduled,
                    &TaskUpdate::to(TaskStatus::Scheduled).attempt_count(task.attempt_count + 1),
                )
                .await?;
            Ok(())
        }

        async fn abort_execution(&self, id: Uuid, reason: String) -> anyhow::Result<()> {
            self.store
                .transition_execution(id, ExecutionStatus::Running, ExecutionStatus::Failed, Some(reason))
                .await?;
            Ok(())
        }
    }

    async fn seed(store: &MemoryStore, first: &str) -> (WorkflowExecution, TaskExecution) {
        let execution = WorkflowExecution::start(Uuid::new_v4(), None, json!({}));
        store.create_execution(&execution).await.unwrap();
        let task = TaskExecution::new(execution.id, first, 0, TaskStatus::Scheduled, json!({}));
        store.create_task(&task).await.unwrap();
        (execution, task)
    }

    #[tokio::test]
    async fn enqueue_only_buffers() {
        let store = Arc::new(MemoryStore::new());
        let queue = DrainQueue::new(store.clone());
        let task = TaskRef { task_id: Uuid::new_v4(), workflow_execution_id: Uuid::new_v4() };

        queue.enqueue(task).await.unwrap();
        queue.enqueue_after(task, Duration::from_secs(60)).await.unwrap();

        let buffered = queue.enqueued();
        assert_eq!(buffered.len(), 2);
        assert_eq!(buffered[1].delay, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn chain_drains_in_one_pass_per_link() {
        let store = Arc::new(MemoryStore::new());
        let queue = DrainQueue::new(store.clone());
        let (execution, task) = seed(&store, "a").await;
        queue
            .enqueue(TaskRef { task_id: task.id, workflow_execution_id: execution.id })
            .await
            .unwrap();

        let runner = ChainRunner { store: store.clone(), chain: vec!["a", "b", "c", "d"] };
        let report = queue.drain_all(&runner, execution.id, 4).await.unwrap();

        assert_eq!(report, DrainReport { iterations: 4, tasks_run: 4 });
        assert!(queue.enqueued().is_empty());
        let tasks = store.list_tasks(execution.id).await.unwrap();
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
    }

    #[tokio::test]
    async fn drain_with_nothing_scheduled_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let queue = DrainQueue::new(store.clone());
        let execution = WorkflowExecution::start(Uuid::new_v4(), None, json!({}));
        store.create_execution(&execution).await.unwrap();

        let runner = ChainRunner { store: store.clone(), chain: vec![] };
        let report = queue.drain_all(&runner, execution.id, 1).await.unwrap();
        assert_eq!(report.iterations, 0);
    }

    #[tokio::test]
    async fn exhaustion_aborts_the_execution_and_lists_pending_tasks() {
        let store = Arc::new(MemoryStore::new());
        let queue = DrainQueue::new(store.clone());
        let (execution, task) = seed(&store, "loop").await;

        let runner = SpinningRunner { store: store.clone() };
        let err = queue.drain_all(&runner, execution.id, 3).await.unwrap_err();

        match err {
            QueueError::DrainExhausted { iterations, pending, .. } => {
                assert_eq!(iterations, 3);
                assert_eq!(pending, vec![task.id]);
            }
            other => panic!("unexpected error: {other}"),
        }
        let execution = store.get_execution(execution.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.error.unwrap().contains("drain exhausted"));
    }
}
