//! Error types for durable task operations.
//!
//! [`TaskError`] is the error surfaced by the engine and by
//! [`TaskHandle::await_result`](crate::TaskHandle::await_result). Storage
//! failures arrive as [`StorageError`] and configuration failures as
//! [`ConfigError`]; both convert into `TaskError` with `?`.
//!
//! Failures raised *inside* a workflow body are plain [`anyhow::Error`]
//! values (see [`WorkflowError`](crate::workflow::WorkflowError)); the engine
//! classifies them with the task's [`RetryPolicy`](crate::RetryPolicy) and
//! records the final message as the task's failure reason.

use thiserror::Error;

pub use crate::engine::config::ConfigError;
pub use crate::store::backend::StorageError;

/// Errors returned by engine operations and task handles.
///
/// # Examples
///
/// ```
/// use durable_tasks::TaskError;
///
/// let err = TaskError::NotFound {
///     task_id: "missing-task".to_string(),
/// };
/// assert!(err.to_string().contains("missing-task"));
/// ```
#[derive(Debug, Error)]
pub enum TaskError {
    /// A caller supplied a value that can never be valid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested operation is not allowed in the task's current state.
    #[error("illegal state for task {task_id}: {message}")]
    IllegalState {
        /// The task the request targeted.
        task_id: String,
        /// What made the request illegal.
        message: String,
    },

    /// No task with the given ID is known to the engine or its stores.
    #[error("task not found: {task_id}")]
    NotFound {
        /// The task ID that was not found.
        task_id: String,
    },

    /// The task ended in `FAILED`.
    #[error("task {task_id} failed: {reason}")]
    Failed {
        /// The failed task.
        task_id: String,
        /// The recorded failure reason.
        reason: String,
    },

    /// The task ended in `CANCELLED`.
    #[error("task {task_id} was cancelled")]
    Cancelled {
        /// The cancelled task.
        task_id: String,
    },

    /// The current execution paused and is waiting to be resumed.
    #[error("task {task_id} paused: {reason}")]
    Paused {
        /// The paused task.
        task_id: String,
        /// Why the workflow paused.
        reason: String,
        /// The scope key the resume value will be written to, if any.
        pending_key: Option<String>,
    },

    /// The engine is shutting down and no longer accepts work.
    #[error("engine is shutting down")]
    ShuttingDown,

    /// A metadata, checkpoint, or journal store failed.
    #[error(transparent)]
    Store(#[from] StorageError),

    /// Engine configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TaskError {
    pub(crate) fn illegal_state(task_id: impl ToString, message: impl Into<String>) -> Self {
        Self::IllegalState {
            task_id: task_id.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn not_found(task_id: impl ToString) -> Self {
        Self::NotFound {
            task_id: task_id.to_string(),
        }
    }

    /// Returns the task ID the error refers to, if it refers to one.
    ///
    /// # Examples
    ///
    /// ```
    /// use durable_tasks::TaskError;
    ///
    /// let err = TaskError::Cancelled { task_id: "t1".to_string() };
    /// assert_eq!(err.task_id(), Some("t1"));
    /// assert_eq!(TaskError::ShuttingDown.task_id(), None);
    /// ```
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::IllegalState { task_id, .. }
            | Self::NotFound { task_id }
            | Self::Failed { task_id, .. }
            | Self::Cancelled { task_id }
            | Self::Paused { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TaskError>();
    }

    #[test]
    fn test_display_illegal_state() {
        let err = TaskError::illegal_state("t-1", "task is already active");
        assert_eq!(
            err.to_string(),
            "illegal state for task t-1: task is already active"
        );
    }

    #[test]
    fn test_display_failed_includes_reason() {
        let err = TaskError::Failed {
            task_id: "t-2".to_string(),
            reason: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "task t-2 failed: boom");
    }

    #[test]
    fn test_store_error_converts() {
        let err: TaskError = StorageError::NotFound {
            key: "metadata/t-3.json".to_string(),
        }
        .into();
        assert!(matches!(err, TaskError::Store(_)));
        assert!(err.to_string().contains("metadata/t-3.json"));
    }

    #[test]
    fn test_task_id_accessor() {
        let err = TaskError::Paused {
            task_id: "t-4".to_string(),
            reason: "need approval".to_string(),
            pending_key: Some("approval".to_string()),
        };
        assert_eq!(err.task_id(), Some("t-4"));
        assert_eq!(TaskError::InvalidArgument("x".into()).task_id(), None);
    }
}
