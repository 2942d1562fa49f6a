//! Task metadata and the atomically updated state cell that owns it.
//!
//! [`TaskMetadata`] is a plain snapshot: cloned out to callers, serialized to
//! stores. The live record sits inside a [`MetadataCell`], one per task,
//! shared by the engine and every [`TaskHandle`](crate::TaskHandle) for that
//! task. All mutation goes through the cell's transition methods, each of
//! which runs under the cell's write lock, so two racing requests from the
//! same pre-state can never both succeed.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::error::TaskError;
use crate::types::status::TaskStatus;
use crate::types::task_id::TaskId;
use crate::workflow::TaskPaused;

/// Snapshot of a task's lifecycle record.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use durable_tasks::{TaskId, TaskMetadata, TaskStatus};
///
/// let meta = TaskMetadata::new(TaskId::random(), "agent", BTreeMap::new());
/// assert_eq!(meta.status, TaskStatus::Pending);
/// assert_eq!(meta.version, 1);
/// assert!(meta.failure_reason.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Task identity.
    pub id: TaskId,
    /// The root agent driving the task.
    pub agent_name: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Creation time; never changes.
    pub created_at: DateTime<Utc>,
    /// Time of the last successful transition; strictly increasing.
    pub updated_at: DateTime<Utc>,
    /// Set only while `status` is `Failed`.
    pub failure_reason: Option<String>,
    /// Caller-supplied labels; never change.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Incremented on every successful transition. Stores drop writes
    /// carrying a lower version than the one they hold.
    pub version: u64,
}

impl TaskMetadata {
    /// Creates a `Pending` record at version 1.
    pub fn new(id: TaskId, agent_name: impl Into<String>, labels: BTreeMap<String, String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            agent_name: agent_name.into(),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            failure_reason: None,
            labels,
            version: 1,
        }
    }

    fn apply(&mut self, status: TaskStatus, failure_reason: Option<String>) {
        self.status = status;
        self.failure_reason = if status == TaskStatus::Failed {
            failure_reason
        } else {
            None
        };
        self.updated_at = next_timestamp(self.updated_at);
        self.version += 1;
    }
}

fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        return now;
    }
    previous
        .checked_add_signed(TimeDelta::microseconds(1))
        .unwrap_or(now)
}

/// Everything observers of a task can see: its metadata plus the outcome
/// of the latest execution.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskState {
    /// The lifecycle record.
    pub metadata: TaskMetadata,
    /// The result, present only while `Completed`.
    pub result: Option<Value>,
    /// The pause signal, present only while `Paused`.
    pub pause: Option<TaskPaused>,
}

/// The single shared, atomically updated state of one task.
///
/// Cloning is cheap and every clone refers to the same state.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use durable_tasks::{MetadataCell, TaskId, TaskMetadata, TaskStatus};
///
/// let cell = MetadataCell::new(TaskMetadata::new(TaskId::random(), "agent", BTreeMap::new()));
///
/// assert!(cell.compare_and_transition(TaskStatus::Pending, TaskStatus::Running, None));
/// assert!(!cell.compare_and_transition(TaskStatus::Pending, TaskStatus::Cancelled, None));
///
/// cell.transition_to(TaskStatus::Failed, Some("boom".into())).unwrap();
/// assert_eq!(cell.snapshot().failure_reason.as_deref(), Some("boom"));
///
/// // FAILED can only be resumed.
/// assert!(!cell.compare_and_transition(TaskStatus::Failed, TaskStatus::Completed, None));
/// assert!(cell.compare_and_transition(TaskStatus::Failed, TaskStatus::Running, None));
/// assert!(cell.snapshot().failure_reason.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct MetadataCell {
    tx: Arc<watch::Sender<TaskState>>,
}

impl MetadataCell {
    /// Wraps a metadata record in a new cell.
    pub fn new(metadata: TaskMetadata) -> Self {
        let (tx, _rx) = watch::channel(TaskState {
            metadata,
            result: None,
            pause: None,
        });
        Self {
            tx: Arc::new(tx),
        }
    }

    /// Current metadata.
    pub fn snapshot(&self) -> TaskMetadata {
        self.tx.borrow().metadata.clone()
    }

    /// Current metadata, result, and pause signal.
    pub fn state(&self) -> TaskState {
        self.tx.borrow().clone()
    }

    /// Current status.
    pub fn status(&self) -> TaskStatus {
        self.tx.borrow().metadata.status
    }

    /// The task's ID.
    pub fn id(&self) -> TaskId {
        self.tx.borrow().metadata.id.clone()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.tx.subscribe()
    }

    /// Unconditionally moves to `status`, unless the task is terminal.
    ///
    /// Fails with [`TaskError::IllegalState`] from `Completed`, `Cancelled`,
    /// or `Failed`; the state is left untouched in that case.
    pub fn transition_to(
        &self,
        status: TaskStatus,
        failure_reason: Option<String>,
    ) -> Result<TaskMetadata, TaskError> {
        let mut outcome = None;
        self.tx.send_if_modified(|state| {
            let current = state.metadata.status;
            if current.is_terminal() {
                outcome = Some(Err(TaskError::illegal_state(
                    &state.metadata.id,
                    format!("cannot transition from terminal status {current} to {status}"),
                )));
                return false;
            }
            Self::apply(state, status, failure_reason);
            outcome = Some(Ok(state.metadata.clone()));
            true
        });
        outcome.unwrap_or_else(|| Err(TaskError::illegal_state("", "transition was not applied")))
    }

    /// Moves from `expected` to `status` atomically.
    ///
    /// Succeeds only if the current status equals `expected` and `expected`
    /// is not hard-terminal. From `Failed` the only permitted target is
    /// `Running`. Returns the post-transition snapshot, or `None` with the
    /// state untouched.
    pub fn try_transition(
        &self,
        expected: TaskStatus,
        status: TaskStatus,
        failure_reason: Option<String>,
    ) -> Option<TaskMetadata> {
        self.try_update(expected, status, failure_reason, |_| {})
    }

    /// Boolean form of [`try_transition`](Self::try_transition).
    pub fn compare_and_transition(
        &self,
        expected: TaskStatus,
        status: TaskStatus,
        failure_reason: Option<String>,
    ) -> bool {
        self.try_transition(expected, status, failure_reason).is_some()
    }

    /// `Running -> Completed`, storing `result` in the same step.
    pub(crate) fn complete_with_result(&self, result: Value) -> Option<TaskMetadata> {
        self.try_update(TaskStatus::Running, TaskStatus::Completed, None, |state| {
            state.result = Some(result);
        })
    }

    /// `expected -> Paused`, storing the pause signal in the same step.
    pub(crate) fn pause(&self, expected: TaskStatus, pause: TaskPaused) -> Option<TaskMetadata> {
        self.try_update(expected, TaskStatus::Paused, None, |state| {
            state.pause = Some(pause);
        })
    }

    fn try_update(
        &self,
        expected: TaskStatus,
        status: TaskStatus,
        failure_reason: Option<String>,
        extra: impl FnOnce(&mut TaskState),
    ) -> Option<TaskMetadata> {
        let mut outcome = None;
        self.tx.send_if_modified(|state| {
            let current = state.metadata.status;
            if current != expected || current.is_hard_terminal() {
                return false;
            }
            if current == TaskStatus::Failed && status != TaskStatus::Running {
                return false;
            }
            Self::apply(state, status, failure_reason);
            extra(state);
            outcome = Some(state.metadata.clone());
            true
        });
        outcome
    }

    fn apply(state: &mut TaskState, status: TaskStatus, failure_reason: Option<String>) {
        state.metadata.apply(status, failure_reason);
        if status != TaskStatus::Paused {
            state.pause = None;
        }
        if status != TaskStatus::Completed {
            state.result = None;
        }
    }
}
