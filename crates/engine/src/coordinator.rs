//! Execution coordinator.
//!
//! `Coordinator` owns the single-task execution protocol:
//! 1. Claim the task with a SCHEDULED → RUNNING compare-and-set; a lost
//!    claim means another caller owns it and the call returns quietly.
//! 2. Dispatch the node's handler with its config and the task input.
//! 3. On success, persist the output, resolve successors, create and
//!    enqueue them, and close the execution once nothing is left to run.
//! 4. On failure, ask the retry policy: reschedule with a delay, or fail the
//!    task and the whole execution.
//!
//! A store or queue fault after the claim releases the task again (or fails
//! the execution when the task already moved on), so no task is left
//! RUNNING with nobody to finish it.
//!
//! The same `run_one` serves the drain queue and broker workers. It never
//! knows which queue it is talking to.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use db::{ExecutionStatus, ExecutionStore, TaskExecution, TaskStatus, TaskUpdate, WorkflowExecution};
use nodes::{ExecutionContext, ExecutionError};
use queue::{TaskQueue, TaskRef, TaskRunner};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn, Span};
use uuid::Uuid;

use crate::catalog::{CompiledWorkflow, WorkflowCatalog};
use crate::config::EngineConfig;
use crate::dispatch::HandlerRegistry;
use crate::models::NodeDefinition;
use crate::resolver::next_nodes;
use crate::retry::{RetryDecision, TerminalReason};
use crate::EngineError;

/// Everything the coordinator works with, passed in explicitly.
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn ExecutionStore>,
    pub catalog: Arc<WorkflowCatalog>,
    pub registry: Arc<HandlerRegistry>,
    pub queue: Arc<dyn TaskQueue>,
    pub config: EngineConfig,
}

/// What a single `run_one` call did.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The task was not SCHEDULED (duplicate delivery or lost claim).
    Skipped,
    /// The execution had already ended; the task was failed unrun.
    Abandoned,
    /// The node succeeded; `next` are the successors the resolver picked.
    Completed { next: Vec<String> },
    /// A transient failure was rescheduled.
    Retrying { attempt: u32, delay: Duration },
    /// The task failed terminally, taking the execution with it.
    Failed,
}

/// An execution together with every task record it produced.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSnapshot {
    pub execution: WorkflowExecution,
    pub tasks: Vec<TaskExecution>,
}

impl ExecutionSnapshot {
    pub fn task(&self, node_id: &str) -> Option<&TaskExecution> {
        self.tasks.iter().find(|t| t.node_id == node_id)
    }
}

pub struct Coordinator {
    ctx: EngineContext,
}

impl Coordinator {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Start a run of `workflow_id`: create the execution and one SCHEDULED
    /// task per start node, enqueue them, and return without waiting.
    #[instrument(skip(self, input))]
    pub async fn trigger(
        &self,
        workflow_id: Uuid,
        actor: Option<String>,
        input: Value,
    ) -> Result<WorkflowExecution, EngineError> {
        let workflow = self.ctx.catalog.get(workflow_id)?;

        let execution = WorkflowExecution::start(workflow_id, actor, input.clone());
        self.ctx.store.create_execution(&execution).await?;

        for node_id in workflow.entry_nodes() {
            let task = TaskExecution::new(execution.id, node_id.as_str(), 0, TaskStatus::Scheduled, input.clone());
            if self.ctx.store.create_task(&task).await? {
                self.ctx.queue.enqueue(task_ref(&task)).await?;
            } else {
                warn!(node_id = %node_id, "start task already exists, not enqueued");
            }
        }

        info!(
            execution_id = %execution.id,
            start_nodes = ?workflow.entry_nodes(),
            "workflow execution triggered"
        );
        Ok(execution)
    }

    /// Run one task through the execution protocol.
    ///
    /// Handler failures are recorded on the task and never returned. Errors
    /// are reserved for integrity faults (unknown task, workflow or node) and
    /// store or queue failures.
    #[instrument(skip(self), fields(execution_id, node_id))]
    pub async fn run_one(&self, task_id: Uuid) -> Result<RunOutcome, EngineError> {
        let task = self.ctx.store.get_task(task_id).await?;
        let span = Span::current();
        span.record("execution_id", tracing::field::display(task.workflow_execution_id));
        span.record("node_id", task.node_id.as_str());

        if task.status != TaskStatus::Scheduled {
            debug!(status = %task.status, "task not scheduled, skipping");
            return Ok(RunOutcome::Skipped);
        }

        let execution = self.ctx.store.get_execution(task.workflow_execution_id).await?;
        if execution.status.is_terminal() {
            return self.abandon(&task, execution.status).await;
        }

        let workflow = self.ctx.catalog.get(execution.workflow_definition_id)?;
        let node = workflow
            .node(&task.node_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownNode {
                workflow_id: workflow.id(),
                node_id: task.node_id.clone(),
            })?;

        // ------------------------------------------------------------------
        // Claim.
        // ------------------------------------------------------------------
        let claimed = self
            .ctx
            .store
            .transition(task.id, TaskStatus::Scheduled, &TaskUpdate::to(TaskStatus::Running).started_now())
            .await?;
        if !claimed {
            debug!("claim lost, another runner owns the task");
            return Ok(RunOutcome::Skipped);
        }

        // ------------------------------------------------------------------
        // Dispatch.
        // ------------------------------------------------------------------
        let handler_ctx = ExecutionContext {
            workflow_definition_id: execution.workflow_definition_id,
            workflow_execution_id: execution.id,
            task_execution_id: task.id,
            node_id: task.node_id.clone(),
            attempt: task.attempt_count,
        };
        let result = self
            .ctx
            .registry
            .execute(&node, task.input_data.clone(), &handler_ctx, self.ctx.config.handler_timeout())
            .await;

        let settled = match result {
            Ok(output) => self.complete(&workflow, &task, &node, output).await,
            Err(err) => self.handle_failure(&task, &node, err).await,
        };
        if let Err(fault) = &settled {
            self.release(&task, fault).await;
        }
        settled
    }

    /// Undo a claim whose follow-up failed. A task still RUNNING goes back to
    /// SCHEDULED so a redelivery or a later drain pass runs it again. A task
    /// that already left RUNNING cannot be replayed, so its execution is
    /// failed instead.
    async fn release(&self, task: &TaskExecution, fault: &EngineError) {
        let store = &self.ctx.store;
        match store.compare_and_set_status(task.id, TaskStatus::Running, TaskStatus::Scheduled).await {
            Ok(true) => warn!(error = %fault, "task released after a fault"),
            Ok(false) => {
                let reason = format!("task '{}' could not be settled: {fault}", task.node_id);
                if let Err(e) = self.abort(task.workflow_execution_id, &reason).await {
                    error!("could not fail execution after a fault: {e}");
                }
            }
            Err(e) => error!(error = %fault, "could not release task: {e}"),
        }
    }

    async fn abandon(&self, task: &TaskExecution, status: ExecutionStatus) -> Result<RunOutcome, EngineError> {
        let update = TaskUpdate::to(TaskStatus::Failed)
            .error(format!("workflow execution already {status}"))
            .ended_now();
        if self.ctx.store.transition(task.id, TaskStatus::Scheduled, &update).await? {
            warn!(%status, "execution already ended, task abandoned");
            Ok(RunOutcome::Abandoned)
        } else {
            Ok(RunOutcome::Skipped)
        }
    }

    async fn complete(
        &self,
        workflow: &CompiledWorkflow,
        task: &TaskExecution,
        node: &NodeDefinition,
        output: Value,
    ) -> Result<RunOutcome, EngineError> {
        let update = TaskUpdate::to(TaskStatus::Completed).output(output.clone()).ended_now();
        if !self.ctx.store.transition(task.id, TaskStatus::Running, &update).await? {
            warn!("task left RUNNING while its handler ran");
            return Ok(RunOutcome::Skipped);
        }

        // A sibling may have failed the execution meanwhile.
        let execution = self.ctx.store.get_execution(task.workflow_execution_id).await?;
        if execution.status.is_terminal() {
            debug!(status = %execution.status, "execution ended, successors not scheduled");
            return Ok(RunOutcome::Completed { next: Vec::new() });
        }

        let next = next_nodes(node, &output);
        info!(?next, "task completed");

        let progressed = self
            .schedule(workflow, task.workflow_execution_id, &task.node_id, &output, &next)
            .await?;
        if !progressed {
            self.finalize_if_done(task.workflow_execution_id).await?;
        }
        Ok(RunOutcome::Completed { next })
    }

    /// Create and enqueue successor tasks. Returns whether any new work was
    /// made runnable.
    async fn schedule(
        &self,
        workflow: &CompiledWorkflow,
        execution_id: Uuid,
        from: &str,
        output: &Value,
        targets: &[String],
    ) -> Result<bool, EngineError> {
        let mut progressed = false;

        for target in targets {
            if workflow.is_join(target) {
                progressed |= self.arrive_at_join(workflow, execution_id, from, target, output).await?;
                continue;
            }

            let visit = self.next_visit(workflow, execution_id, target).await?;
            let successor = TaskExecution::new(execution_id, target.as_str(), visit, TaskStatus::Scheduled, output.clone());
            if self.ctx.store.create_task(&successor).await? {
                self.ctx.queue.enqueue(task_ref(&successor)).await?;
                progressed = true;
            } else {
                debug!(target = %target, visit, "successor already exists");
            }
        }

        Ok(progressed)
    }

    /// Visit number for a new task of `node_id`. Always 0 unless the
    /// workflow allows re-entry.
    async fn next_visit(
        &self,
        workflow: &CompiledWorkflow,
        execution_id: Uuid,
        node_id: &str,
    ) -> Result<u32, EngineError> {
        if !workflow.allows_reentry() {
            return Ok(0);
        }
        let tasks = self.ctx.store.list_tasks(execution_id).await?;
        Ok(tasks.iter().filter(|t| t.node_id == node_id).count() as u32)
    }

    /// Record one predecessor's arrival at a join and release the join once
    /// every incoming edge has arrived.
    async fn arrive_at_join(
        &self,
        workflow: &CompiledWorkflow,
        execution_id: Uuid,
        from: &str,
        join_id: &str,
        output: &Value,
    ) -> Result<bool, EngineError> {
        let store = &self.ctx.store;
        let existing: Vec<TaskExecution> = store
            .list_tasks(execution_id)
            .await?
            .into_iter()
            .filter(|t| t.node_id == join_id)
            .collect();

        let visit = match existing.iter().max_by_key(|t| t.visit) {
            Some(latest) if latest.status == TaskStatus::Waiting => latest.visit,
            Some(_) if !workflow.allows_reentry() => {
                debug!(join = %join_id, "join already released");
                return Ok(false);
            }
            Some(latest) => latest.visit + 1,
            None => 0,
        };

        let fresh = TaskExecution::new(execution_id, join_id, visit, TaskStatus::Waiting, Value::Object(Default::default()));
        let join = if store.create_task(&fresh).await? {
            fresh
        } else {
            match store.find_task(execution_id, join_id, visit).await? {
                Some(task) => task,
                None => {
                    warn!(join = %join_id, visit, "join task vanished");
                    return Ok(false);
                }
            }
        };

        let arrivals = store.record_arrival(join.id, from, output).await?;
        let needed = workflow.in_degree(join_id);
        debug!(join = %join_id, arrivals, needed, "arrival recorded");
        if arrivals < needed {
            return Ok(false);
        }

        if store
            .compare_and_set_status(join.id, TaskStatus::Waiting, TaskStatus::Scheduled)
            .await?
        {
            info!(join = %join_id, "join released");
            self.ctx.queue.enqueue(task_ref(&join)).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn handle_failure(
        &self,
        task: &TaskExecution,
        node: &NodeDefinition,
        err: ExecutionError,
    ) -> Result<RunOutcome, EngineError> {
        let policy = node.retry.as_ref().unwrap_or(&self.ctx.config.retry);

        match policy.should_retry(task.attempt_count, &err) {
            RetryDecision::Retry { delay } => {
                let attempt = task.attempt_count + 1;
                let due = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                let update = TaskUpdate::to(TaskStatus::Scheduled)
                    .attempt_count(attempt)
                    .error(err.message())
                    .scheduled_for(due);
                if !self.ctx.store.transition(task.id, TaskStatus::Running, &update).await? {
                    warn!("task left RUNNING while its handler ran");
                    return Ok(RunOutcome::Skipped);
                }
                warn!(attempt, max_retries = policy.max_retries, ?delay, error = %err, "transient failure, retry scheduled");
                self.ctx.queue.enqueue_after(task_ref(task), delay).await?;
                Ok(RunOutcome::Retrying { attempt, delay })
            }
            RetryDecision::Fail(reason) => {
                let failure = match reason {
                    TerminalReason::NonTransient => EngineError::NodeFatal {
                        node_id: node.id.clone(),
                        message: err.message().to_owned(),
                    },
                    TerminalReason::RetriesExceeded => EngineError::NodeRetryExhausted {
                        node_id: node.id.clone(),
                        attempts: task.attempt_count + 1,
                        message: err.message().to_owned(),
                    },
                };
                let message = failure.to_string();
                error!(error = %message, "task failed");

                let update = TaskUpdate::to(TaskStatus::Failed).error(message.clone()).ended_now();
                if !self.ctx.store.transition(task.id, TaskStatus::Running, &update).await? {
                    warn!("task left RUNNING while its handler ran");
                    return Ok(RunOutcome::Skipped);
                }
                self.fail_execution(task.workflow_execution_id, message).await?;
                Ok(RunOutcome::Failed)
            }
        }
    }

    /// Close the execution when no task is SCHEDULED or RUNNING any more.
    /// Joins still WAITING at that point can never be released, so the
    /// execution fails as stalled.
    async fn finalize_if_done(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let tasks = self.ctx.store.list_tasks(execution_id).await?;
        if tasks
            .iter()
            .any(|t| matches!(t.status, TaskStatus::Scheduled | TaskStatus::Running))
        {
            return Ok(());
        }

        let stalled: Vec<&str> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Waiting)
            .map(|t| t.node_id.as_str())
            .collect();
        if !stalled.is_empty() {
            return self
                .fail_execution(execution_id, format!("stalled: join(s) {stalled:?} can no longer be released"))
                .await;
        }

        if let Some(failed) = tasks.iter().find(|t| t.status == TaskStatus::Failed) {
            let reason = failed.error.clone().unwrap_or_else(|| format!("task '{}' failed", failed.node_id));
            return self.fail_execution(execution_id, reason).await;
        }

        if self
            .ctx
            .store
            .transition_execution(execution_id, ExecutionStatus::Running, ExecutionStatus::Completed, None)
            .await?
        {
            info!(%execution_id, tasks = tasks.len(), "workflow execution completed");
        }
        Ok(())
    }

    async fn fail_execution(&self, execution_id: Uuid, reason: String) -> Result<(), EngineError> {
        if self
            .ctx
            .store
            .transition_execution(execution_id, ExecutionStatus::Running, ExecutionStatus::Failed, Some(reason.clone()))
            .await?
        {
            error!(%execution_id, %reason, "workflow execution failed");
        }
        Ok(())
    }

    /// Fail an execution from outside the protocol. Tasks that were still
    /// waiting to run are failed with the same reason.
    #[instrument(skip(self))]
    pub async fn abort(&self, execution_id: Uuid, reason: &str) -> Result<(), EngineError> {
        self.fail_execution(execution_id, reason.to_owned()).await?;

        for task in self.ctx.store.list_tasks(execution_id).await? {
            if !matches!(task.status, TaskStatus::Scheduled | TaskStatus::Waiting) {
                continue;
            }
            let update = TaskUpdate::to(TaskStatus::Failed).error(reason).ended_now();
            self.ctx.store.transition(task.id, task.status, &update).await?;
        }
        Ok(())
    }

    pub async fn inspect(&self, execution_id: Uuid) -> Result<ExecutionSnapshot, EngineError> {
        let execution = self.ctx.store.get_execution(execution_id).await?;
        let tasks = self.ctx.store.list_tasks(execution_id).await?;
        Ok(ExecutionSnapshot { execution, tasks })
    }
}

fn task_ref(task: &TaskExecution) -> TaskRef {
    TaskRef { task_id: task.id, workflow_execution_id: task.workflow_execution_id }
}

#[async_trait]
impl TaskRunner for Coordinator {
    async fn run_one(&self, task_id: Uuid) -> anyhow::Result<()> {
        Coordinator::run_one(self, task_id).await?;
        Ok(())
    }

    async fn abort_execution(&self, workflow_execution_id: Uuid, reason: String) -> anyhow::Result<()> {
        self.abort(workflow_execution_id, &reason).await?;
        Ok(())
    }
}
