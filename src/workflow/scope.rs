//! The mutable progress scope handed to a workflow body.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::checkpoint::{Checkpoint, StepRecord};
use crate::store::{CheckpointStore, EventJournal};
use crate::types::checkpoint::CheckpointPolicy;
use crate::types::event::TaskEvent;
use crate::types::task_id::TaskId;
use crate::workflow::{TaskInterrupted, WorkflowError};

/// Key/value state, step journal, and cancellation signal for one run of a
/// workflow body.
///
/// Clones share the same state. A scope rebuilt from a [`Checkpoint`]
/// replays recorded steps: [`step`](Self::step) returns the recorded output
/// while names keep matching, and starts executing again from the first
/// step that diverges or was never recorded.
#[derive(Clone)]
pub struct WorkflowScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    task_id: TaskId,
    policy: CheckpointPolicy,
    checkpoints: Arc<dyn CheckpointStore>,
    journal: Arc<dyn EventJournal>,
    cancel: CancellationToken,
    state: Mutex<ScopeState>,
}

#[derive(Default)]
struct ScopeState {
    values: BTreeMap<String, Value>,
    steps: Vec<StepRecord>,
    cursor: usize,
}

impl WorkflowScope {
    pub(crate) fn new(
        task_id: TaskId,
        policy: CheckpointPolicy,
        checkpoints: Arc<dyn CheckpointStore>,
        journal: Arc<dyn EventJournal>,
        cancel: CancellationToken,
        restored: Option<Checkpoint>,
        inputs: impl IntoIterator<Item = (String, Value)>,
    ) -> Self {
        let mut state = restored.map_or_else(ScopeState::default, |cp| ScopeState {
            values: cp.values,
            steps: cp.steps,
            cursor: 0,
        });
        state.values.extend(inputs);

        Self {
            inner: Arc::new(ScopeInner {
                task_id,
                policy,
                checkpoints,
                journal,
                cancel,
                state: Mutex::new(state),
            }),
        }
    }

    /// The task this scope belongs to.
    pub fn task_id(&self) -> &TaskId {
        &self.inner.task_id
    }

    /// Reads a value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().values.get(key).cloned()
    }

    /// Reads and deserializes a value.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, WorkflowError> {
        self.get(key)
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| anyhow::anyhow!("scope value {key:?} has unexpected shape: {e}"))
    }

    /// Writes a value. It is persisted with the next checkpoint.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.state.lock().values.insert(key.into(), value);
    }

    /// Removes a value, returning it.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().values.remove(key)
    }

    /// Copy of the whole key/value state.
    pub fn values(&self) -> BTreeMap<String, Value> {
        self.inner.state.lock().values.clone()
    }

    /// Names of the steps recorded so far (including replayed ones).
    pub fn completed_steps(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        state.steps[..state.cursor]
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    /// `true` once the task has been cancelled, timed out, or interrupted.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves once the task has been cancelled, timed out, or interrupted.
    pub async fn cancelled(&self) {
        self.inner.cancel.cancelled().await;
    }

    /// Fails with [`TaskInterrupted`] if the task has been interrupted.
    pub fn check_cancelled(&self) -> Result<(), WorkflowError> {
        if self.is_cancelled() {
            return Err(TaskInterrupted {
                task_id: self.inner.task_id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Runs one named unit of work, or replays its recorded output.
    ///
    /// On success the output is recorded, stored in the scope under `name`,
    /// and, under [`CheckpointPolicy::AfterEachAgent`], persisted as a new
    /// checkpoint before this method returns. Errors from `work` are
    /// returned as-is and nothing is recorded.
    pub async fn step<T, F, Fut>(&self, name: &str, work: F) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, WorkflowError>>,
    {
        self.check_cancelled()?;

        if let Some(recorded) = self.replay(name) {
            tracing::debug!(task_id = %self.inner.task_id, step = name, "replaying recorded step");
            return serde_json::from_value(recorded)
                .map_err(|e| anyhow::anyhow!("recorded output of step {name:?} does not match: {e}"));
        }

        let output = work().await?;
        let value = serde_json::to_value(&output)?;

        let (index, checkpoint) = {
            let mut state = self.inner.state.lock();
            let index = state.cursor;
            state.steps.push(StepRecord {
                name: name.to_string(),
                output: value.clone(),
            });
            state.values.insert(name.to_string(), value);
            state.cursor += 1;
            let checkpoint = self
                .inner
                .policy
                .checkpoints_steps()
                .then(|| Self::snapshot_of(&self.inner.task_id, &state));
            (index, checkpoint)
        };

        if let Some(checkpoint) = checkpoint {
            self.inner.checkpoints.save_checkpoint(&checkpoint).await?;
        }
        if let Err(e) = self
            .inner
            .journal
            .append_event(&self.inner.task_id, &TaskEvent::step_completed(index, name))
            .await
        {
            tracing::warn!(task_id = %self.inner.task_id, step = name, error = %e, "failed to journal step");
        }
        Ok(output)
    }

    /// The scope's current state as a checkpoint.
    pub fn snapshot(&self) -> Checkpoint {
        let state = self.inner.state.lock();
        Self::snapshot_of(&self.inner.task_id, &state)
    }

    fn snapshot_of(task_id: &TaskId, state: &ScopeState) -> Checkpoint {
        Checkpoint {
            task_id: task_id.clone(),
            steps: state.steps[..state.cursor].to_vec(),
            values: state.values.clone(),
            taken_at: Utc::now(),
        }
    }

    /// Returns the recorded output if the next recorded step is `name`.
    /// A mismatch discards the remaining recorded steps.
    fn replay(&self, name: &str) -> Option<Value> {
        let mut state = self.inner.state.lock();
        let cursor = state.cursor;
        match state.steps.get(cursor).map(|r| r.name == name) {
            Some(true) => {
                state.cursor += 1;
                Some(state.steps[cursor].output.clone())
            }
            Some(false) => {
                state.steps.truncate(cursor);
                None
            }
            None => None,
        }
    }
}

impl std::fmt::Debug for WorkflowScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("WorkflowScope")
            .field("task_id", &self.inner.task_id)
            .field("policy", &self.inner.policy)
            .field("steps", &state.cursor)
            .field("values", &state.values.len())
            .finish()
    }
}
