//! One execution of a task: from acquiring a worker slot until the body
//! completes, pauses, fails for good, or is interrupted.
//!
//! Every status change goes through the task's [`MetadataCell`] as a
//! compare-and-set from the status this worker expects. When a CAS loses
//! (the task was cancelled or timed out underneath it) the worker drops its
//! outcome and exits without touching the stores.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

use crate::domain::metadata::MetadataCell;
use crate::engine::inner::EngineInner;
use crate::types::checkpoint::CheckpointPolicy;
use crate::types::configuration::TaskConfiguration;
use crate::types::event::TaskEvent;
use crate::types::retry::RetryPolicy;
use crate::types::status::TaskStatus;
use crate::types::task_id::TaskId;
use crate::workflow::{TaskPaused, Workflow, WorkflowError, WorkflowOutcome, WorkflowScope};

pub(crate) struct Execution {
    engine: Arc<EngineInner>,
    task_id: TaskId,
    cell: MetadataCell,
    workflow: Arc<dyn Workflow>,
    retry: RetryPolicy,
    policy: CheckpointPolicy,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    inputs: Vec<(String, Value)>,
}

impl Execution {
    pub(crate) fn new(
        engine: Arc<EngineInner>,
        cell: MetadataCell,
        workflow: Arc<dyn Workflow>,
        configuration: &TaskConfiguration,
        cancel: CancellationToken,
        inputs: Vec<(String, Value)>,
    ) -> Self {
        let policy = configuration
            .checkpoint_policy()
            .unwrap_or(engine.config.default_checkpoint_policy);
        Self {
            task_id: cell.id(),
            retry: configuration.effective_retry_policy().clone(),
            timeout: configuration.timeout(),
            engine,
            cell,
            workflow,
            policy,
            cancel,
            inputs,
        }
    }

    pub(crate) async fn run(self) {
        let finished = CancellationToken::new();
        let _finished = finished.clone().drop_guard();
        self.drive(&finished).await;
    }

    async fn drive(&self, finished: &CancellationToken) {
        let Some(mut permit) = self.acquire_slot().await else {
            return;
        };

        match self.cell.status() {
            TaskStatus::Pending => {
                let Some(metadata) =
                    self.cell
                        .try_transition(TaskStatus::Pending, TaskStatus::Running, None)
                else {
                    return;
                };
                tracing::debug!(task_id = %self.task_id, "task running");
                self.engine.persist(&metadata).await;
            }
            TaskStatus::Running => {}
            _ => return,
        }

        // Time spent queued for a slot does not count against the timeout.
        if let Some(timeout) = self.timeout {
            self.engine.tracker.spawn(watch_timeout(
                self.engine.clone(),
                self.cell.clone(),
                self.cancel.clone(),
                finished.clone(),
                timeout,
            ));
        }

        let mut retries = 0u32;
        loop {
            let scope = self.scope().await;
            match self.workflow.run(scope.clone()).await.normalize() {
                WorkflowOutcome::Completed(value) => return self.complete(&scope, value).await,
                WorkflowOutcome::Paused(pause) => return self.pause(pause).await,
                WorkflowOutcome::Failed(error) => {
                    if self.cancel.is_cancelled() || self.cell.status() != TaskStatus::Running {
                        tracing::debug!(
                            task_id = %self.task_id,
                            error = %format!("{error:#}"),
                            "attempt ended after the task was interrupted"
                        );
                        return;
                    }
                    if retries >= self.retry.max_retries() || !self.retry.is_retryable(&*error) {
                        return self.fail(&error, retries).await;
                    }

                    retries += 1;
                    drop(permit);
                    if !self.back_off(retries, &error).await {
                        return;
                    }
                    permit = match self.acquire_slot().await {
                        Some(permit) => permit,
                        None => return,
                    };
                    let Some(metadata) =
                        self.cell
                            .try_transition(TaskStatus::Retrying, TaskStatus::Running, None)
                    else {
                        return;
                    };
                    self.engine.persist(&metadata).await;
                }
            }
        }
    }

    async fn acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            permit = Arc::clone(&self.engine.slots).acquire_owned() => permit.ok(),
            _ = self.cancel.cancelled() => None,
        }
    }

    async fn scope(&self) -> WorkflowScope {
        let restored = if self.policy == CheckpointPolicy::None {
            None
        } else {
            match self.engine.checkpoints.load_checkpoint(&self.task_id).await {
                Ok(checkpoint) => checkpoint,
                Err(e) => {
                    tracing::error!(
                        task_id = %self.task_id,
                        error = %e,
                        "failed to load checkpoint, starting from an empty scope"
                    );
                    None
                }
            }
        };
        WorkflowScope::new(
            self.task_id.clone(),
            self.policy,
            self.engine.checkpoints.clone(),
            self.engine.journal.clone(),
            self.cancel.clone(),
            restored,
            self.inputs.clone(),
        )
    }

    /// `Running -> Retrying`, then sleeps for the backoff delay. Returns
    /// `false` if the task left `Retrying` or was interrupted meanwhile.
    async fn back_off(&self, attempt: u32, error: &WorkflowError) -> bool {
        let delay = self.retry.delay_for_attempt(attempt);
        let Some(metadata) =
            self.cell
                .try_transition(TaskStatus::Running, TaskStatus::Retrying, None)
        else {
            return false;
        };

        let message = format!("{error:#}");
        tracing::warn!(
            task_id = %self.task_id,
            attempt,
            max_retries = self.retry.max_retries(),
            delay_ms = delay.as_millis() as u64,
            error = %message,
            "task attempt failed, retrying"
        );
        self.engine.persist(&metadata).await;
        self.engine
            .record(
                &self.task_id,
                TaskEvent::retrying(
                    attempt,
                    self.retry.max_retries(),
                    message,
                    delay.as_millis() as u64,
                ),
            )
            .await;

        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.cancel.cancelled() => false,
        }
    }

    async fn complete(&self, scope: &WorkflowScope, value: Value) {
        if self.policy.checkpoints_completion() {
            if let Err(e) = self.engine.checkpoints.save_checkpoint(&scope.snapshot()).await {
                tracing::error!(task_id = %self.task_id, error = %e, "failed to save final checkpoint");
            }
        }
        let Some(metadata) = self.cell.complete_with_result(value.clone()) else {
            tracing::debug!(
                task_id = %self.task_id,
                status = %self.cell.status(),
                "discarding result, task already left RUNNING"
            );
            return;
        };
        tracing::info!(task_id = %self.task_id, "task completed");
        self.engine.persist(&metadata).await;
        self.engine
            .record(&self.task_id, TaskEvent::completed(value))
            .await;
    }

    async fn pause(&self, pause: TaskPaused) {
        // Stamped before the transition so it sorts ahead of any resume.
        let event = TaskEvent::paused(pause.reason.clone(), pause.pending_key.clone());
        let Some(metadata) = self.cell.pause(TaskStatus::Running, pause.clone()) else {
            tracing::debug!(
                task_id = %self.task_id,
                status = %self.cell.status(),
                "discarding pause, task already left RUNNING"
            );
            return;
        };
        tracing::info!(
            task_id = %self.task_id,
            reason = %pause.reason,
            pending_key = ?pause.pending_key,
            "task paused"
        );
        self.engine.record(&self.task_id, event).await;
        self.engine.persist(&metadata).await;
    }

    async fn fail(&self, error: &WorkflowError, retries: u32) {
        let reason = format!("{error:#}");
        let Some(metadata) = self.cell.try_transition(
            TaskStatus::Running,
            TaskStatus::Failed,
            Some(reason.clone()),
        ) else {
            return;
        };
        tracing::warn!(
            task_id = %self.task_id,
            attempts = retries + 1,
            error = %reason,
            "task failed"
        );
        self.engine.persist(&metadata).await;
        self.engine
            .record(&self.task_id, TaskEvent::failed(reason))
            .await;
    }
}

/// Fails the task if it is still `Running` or `Retrying` when `timeout`
/// elapses, and interrupts its body.
async fn watch_timeout(
    engine: Arc<EngineInner>,
    cell: MetadataCell,
    cancel: CancellationToken,
    finished: CancellationToken,
    timeout: Duration,
) {
    tokio::select! {
        _ = finished.cancelled() => {}
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(timeout) => {
            let reason = format!("task timed out after {timeout:?}");
            let metadata = cell
                .try_transition(TaskStatus::Running, TaskStatus::Failed, Some(reason.clone()))
                .or_else(|| cell.try_transition(TaskStatus::Retrying, TaskStatus::Failed, Some(reason.clone())));
            if let Some(metadata) = metadata {
                cancel.cancel();
                tracing::warn!(task_id = %metadata.id, ?timeout, "task timed out");
                engine.persist(&metadata).await;
                engine.record(&metadata.id, TaskEvent::failed(reason)).await;
            }
        }
    }
}
