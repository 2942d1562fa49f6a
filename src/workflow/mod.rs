//! The workflow body abstraction.
//!
//! A workflow body is anything implementing [`Workflow`], including plain
//! async closures taking a [`WorkflowScope`]. Each run ends in one of three
//! [`WorkflowOutcome`]s: a result, a pause signal, or an error. Errors are
//! [`anyhow::Error`] so bodies can use `?` freely; a [`TaskPaused`]
//! anywhere in an error's source chain is still treated as a pause.
//!
//! # Examples
//!
//! ```
//! use durable_tasks::{TaskPaused, WorkflowOutcome, WorkflowScope};
//! use serde_json::json;
//!
//! let body = |scope: WorkflowScope| async move {
//!     let draft: String = match scope
//!         .step("draft", || async { Ok("first draft".to_string()) })
//!         .await
//!     {
//!         Ok(d) => d,
//!         Err(e) => return WorkflowOutcome::Failed(e),
//!     };
//!     match scope.get("approval") {
//!         Some(approval) => WorkflowOutcome::Completed(json!({ "draft": draft, "approval": approval })),
//!         None => TaskPaused::awaiting("needs editor approval", "approval").into(),
//!     }
//! };
//! # let _ = body;
//! ```

mod scope;

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use scope::WorkflowScope;

/// Error type returned by workflow bodies and steps.
pub type WorkflowError = anyhow::Error;

/// Signal that a workflow cannot continue until it is resumed.
///
/// Return it as [`WorkflowOutcome::Paused`], or propagate it as an error
/// with `?`; either way the task moves to `PAUSED` and is never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("workflow paused: {reason}")]
pub struct TaskPaused {
    /// Human-readable reason.
    pub reason: String,
    /// Scope key that the resume value will be written to.
    pub pending_key: Option<String>,
}

impl TaskPaused {
    /// Pause without expecting a specific input.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            pending_key: None,
        }
    }

    /// Pause until a value for `pending_key` is supplied on resume.
    pub fn awaiting(reason: impl Into<String>, pending_key: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            pending_key: Some(pending_key.into()),
        }
    }
}

/// Raised by [`WorkflowScope::step`] once the task has been cancelled,
/// timed out, or interrupted by shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task {task_id} was interrupted")]
pub struct TaskInterrupted {
    /// The interrupted task.
    pub task_id: String,
}

/// How one run of a workflow body ended.
#[derive(Debug)]
pub enum WorkflowOutcome {
    /// Finished with a result.
    Completed(Value),
    /// Needs to be resumed, usually with external input.
    Paused(TaskPaused),
    /// Failed; the task's retry policy decides what happens next.
    Failed(WorkflowError),
}

impl WorkflowOutcome {
    /// Builds a `Failed` outcome from any error.
    pub fn failed(error: impl Into<WorkflowError>) -> Self {
        Self::Failed(error.into())
    }

    /// Turns a `Failed` outcome whose error chain contains a [`TaskPaused`]
    /// into `Paused`.
    pub(crate) fn normalize(self) -> Self {
        match self {
            Self::Failed(err) => {
                let pause = err
                    .chain()
                    .find_map(|e| e.downcast_ref::<TaskPaused>())
                    .cloned();
                match pause {
                    Some(pause) => Self::Paused(pause),
                    None => Self::Failed(err),
                }
            }
            other => other,
        }
    }
}

impl From<TaskPaused> for WorkflowOutcome {
    fn from(pause: TaskPaused) -> Self {
        Self::Paused(pause)
    }
}

impl<E> From<Result<Value, E>> for WorkflowOutcome
where
    E: Into<WorkflowError>,
{
    fn from(result: Result<Value, E>) -> Self {
        match result {
            Ok(value) => Self::Completed(value),
            Err(err) => Self::Failed(err.into()),
        }
    }
}

/// A workflow body the engine can run, pause, retry, and resume.
///
/// Implemented for every `Fn(WorkflowScope) -> impl Future<Output = WorkflowOutcome>`.
/// A body may run more than once for the same task (retries, resumes);
/// work wrapped in [`WorkflowScope::step`] is not repeated once it has
/// been checkpointed.
#[async_trait]
pub trait Workflow: Send + Sync {
    /// Runs the body against `scope`.
    async fn run(&self, scope: WorkflowScope) -> WorkflowOutcome;
}

#[async_trait]
impl<F, Fut> Workflow for F
where
    F: Fn(WorkflowScope) -> Fut + Send + Sync,
    Fut: Future<Output = WorkflowOutcome> + Send,
{
    async fn run(&self, scope: WorkflowScope) -> WorkflowOutcome {
        (self)(scope).await
    }
}
