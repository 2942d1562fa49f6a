//! Caller-side view of one task.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::metadata::{MetadataCell, TaskMetadata, TaskState};
use crate::engine::EngineInner;
use crate::error::TaskError;
use crate::types::status::TaskStatus;
use crate::types::task_id::TaskId;

/// Handle to a task returned by [`start`](crate::DurableTaskEngine::start)
/// and [`resume`](crate::DurableTaskEngine::resume).
///
/// The handle observes the task's live state: status reads never block and
/// always reflect the latest transition, including ones made by other
/// handles or by the engine.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    cell: MetadataCell,
    engine: Arc<EngineInner>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, cell: MetadataCell, engine: Arc<EngineInner>) -> Self {
        Self { id, cell, engine }
    }

    /// The task's ID.
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Current status.
    pub fn status(&self) -> TaskStatus {
        self.cell.status()
    }

    /// Current metadata.
    pub fn metadata(&self) -> TaskMetadata {
        self.cell.snapshot()
    }

    /// The result, once the task is `COMPLETED`.
    pub fn result(&self) -> Option<Value> {
        self.cell.state().result
    }

    /// Cancels the task. See [`DurableTaskEngine::cancel`](crate::DurableTaskEngine::cancel).
    pub async fn cancel(&self) -> bool {
        self.engine.cancel(&self.id).await
    }

    /// Waits until the task reaches `status`, returning the metadata at
    /// that point.
    ///
    /// Returns early with [`TaskError::IllegalState`] if the task becomes
    /// `COMPLETED` or `CANCELLED` instead, since it can never leave those.
    pub async fn wait_for_status(&self, status: TaskStatus) -> Result<TaskMetadata, TaskError> {
        let state = self
            .wait_until(|s| s == status || s.is_hard_terminal())
            .await;
        if state.metadata.status == status {
            return Ok(state.metadata);
        }
        Err(TaskError::illegal_state(
            &self.id,
            format!(
                "task ended {} while waiting for {status}",
                state.metadata.status
            ),
        ))
    }

    /// Waits for the current execution to end.
    ///
    /// # Errors
    ///
    /// - [`TaskError::Failed`] with the recorded reason
    /// - [`TaskError::Cancelled`]
    /// - [`TaskError::Paused`] with the pause reason and pending key; the
    ///   task can be resumed and awaited again
    pub async fn await_result(&self) -> Result<Value, TaskError> {
        let state = self
            .wait_until(|s| s.is_terminal() || s == TaskStatus::Paused)
            .await;
        let task_id = self.id.to_string();

        match state.metadata.status {
            TaskStatus::Completed => Ok(state.result.unwrap_or(Value::Null)),
            TaskStatus::Failed => Err(TaskError::Failed {
                task_id,
                reason: state.metadata.failure_reason.unwrap_or_default(),
            }),
            TaskStatus::Cancelled => Err(TaskError::Cancelled { task_id }),
            TaskStatus::Paused => {
                let (reason, pending_key) = state
                    .pause
                    .map_or_else(|| (String::new(), None), |p| (p.reason, p.pending_key));
                Err(TaskError::Paused {
                    task_id,
                    reason,
                    pending_key,
                })
            }
            other => Err(TaskError::illegal_state(
                task_id,
                format!("task is still {other}"),
            )),
        }
    }

    async fn wait_until(&self, done: impl Fn(TaskStatus) -> bool) -> TaskState {
        let mut rx = self.cell.subscribe();
        let state = match rx.wait_for(|state| done(state.metadata.status)).await {
            Ok(state) => TaskState::clone(&state),
            // The sender lives in the cell this handle holds.
            Err(_) => self.cell.state(),
        };
        state
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}
