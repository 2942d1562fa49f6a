//! Store failures on caller-facing operations.
//!
//! `start` and `resume` must surface metadata and journal write errors to
//! the caller, and a failed resume must leave the task where it was.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use durable_tasks::store::StorageError;
use durable_tasks::{
    DurableTaskEngine, EventJournal, InMemoryStore, MetadataStore, RetryPolicy,
    TaskConfiguration, TaskError, TaskEvent, TaskFilter, TaskId, TaskMetadata, TaskPaused,
    TaskStatus, WorkflowOutcome, WorkflowScope,
};

fn broken() -> StorageError {
    StorageError::Backend {
        message: "disk unavailable".to_string(),
    }
}

/// Metadata store whose saves fail while `failing` is set.
#[derive(Default)]
struct FlakyMetadata {
    inner: InMemoryStore,
    failing: AtomicBool,
}

impl FlakyMetadata {
    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetadataStore for FlakyMetadata {
    async fn save_metadata(&self, metadata: &TaskMetadata) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(broken());
        }
        self.inner.save_metadata(metadata).await
    }

    async fn load_metadata(&self, task_id: &TaskId) -> Result<Option<TaskMetadata>, StorageError> {
        self.inner.load_metadata(task_id).await
    }

    async fn list_metadata(&self, filter: &TaskFilter) -> Result<Vec<TaskMetadata>, StorageError> {
        self.inner.list_metadata(filter).await
    }

    async fn delete_metadata(&self, task_id: &TaskId) -> Result<bool, StorageError> {
        self.inner.delete_metadata(task_id).await
    }
}

/// Journal that rejects every append.
struct ReadOnlyJournal;

#[async_trait]
impl EventJournal for ReadOnlyJournal {
    async fn append_event(&self, _task_id: &TaskId, _event: &TaskEvent) -> Result<(), StorageError> {
        Err(broken())
    }

    async fn events(&self, _task_id: &TaskId) -> Result<Vec<TaskEvent>, StorageError> {
        Ok(Vec::new())
    }

    async fn delete_events(&self, _task_id: &TaskId) -> Result<bool, StorageError> {
        Ok(false)
    }
}

fn engine_with(metadata: Arc<FlakyMetadata>) -> DurableTaskEngine {
    DurableTaskEngine::builder()
        .metadata_store(metadata)
        .build()
        .unwrap()
}

fn config(agent: &str) -> TaskConfiguration {
    TaskConfiguration::builder(agent).build().unwrap()
}

// ─── Start ──────────────────────────────────────────────────────────────────

mod start {
    use super::*;

    #[tokio::test]
    async fn metadata_write_failure_reaches_caller() {
        let metadata = Arc::new(FlakyMetadata::default());
        metadata.set_failing(true);
        let engine = engine_with(metadata);

        let err = engine
            .start(config("agent"), |_scope: WorkflowScope| async {
                WorkflowOutcome::Completed(Value::Null)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Store(StorageError::Backend { .. })), "{err:?}");
        assert!(engine.list_tasks(&TaskFilter::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn journal_write_failure_reaches_caller() {
        let engine = DurableTaskEngine::builder()
            .event_journal(Arc::new(ReadOnlyJournal))
            .build()
            .unwrap();

        let err = engine
            .start(config("agent"), |_scope: WorkflowScope| async {
                WorkflowOutcome::Completed(Value::Null)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Store(_)), "{err:?}");
    }
}

// ─── Resume Rollback ────────────────────────────────────────────────────────

mod resume_rollback {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn failed_save_restores_pause_and_pending_key() {
        let metadata = Arc::new(FlakyMetadata::default());
        let engine = engine_with(metadata.clone());
        let handle = engine
            .start(config("asker"), |scope: WorkflowScope| async move {
                match scope.get("answer") {
                    Some(answer) => WorkflowOutcome::Completed(answer),
                    None => TaskPaused::awaiting("ask the user", "answer").into(),
                }
            })
            .await
            .unwrap();
        assert!(matches!(handle.await_result().await, Err(TaskError::Paused { .. })));

        metadata.set_failing(true);
        let err = engine.resume(handle.id(), Some(json!(1))).await.unwrap_err();
        assert!(matches!(err, TaskError::Store(_)), "{err:?}");
        assert_eq!(handle.status(), TaskStatus::Paused);
        match handle.await_result().await {
            Err(TaskError::Paused { reason, pending_key, .. }) => {
                assert_eq!(reason, "ask the user");
                assert_eq!(pending_key.as_deref(), Some("answer"));
            }
            other => panic!("expected the pause to be restored, got {other:?}"),
        }

        metadata.set_failing(false);
        let resumed = engine.resume(handle.id(), Some(json!(42))).await.unwrap();
        assert_eq!(resumed.await_result().await.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn failed_save_restores_failure_reason() {
        let metadata = Arc::new(FlakyMetadata::default());
        let engine = engine_with(metadata.clone());
        let handle = engine
            .start(
                TaskConfiguration::builder("fragile")
                    .retry_policy(RetryPolicy::NONE)
                    .build()
                    .unwrap(),
                |_scope: WorkflowScope| async {
                    WorkflowOutcome::Failed(anyhow::anyhow!("upstream rejected"))
                },
            )
            .await
            .unwrap();
        assert!(matches!(handle.await_result().await, Err(TaskError::Failed { .. })));

        metadata.set_failing(true);
        let err = engine.resume(handle.id(), None).await.unwrap_err();
        assert!(matches!(err, TaskError::Store(_)), "{err:?}");

        let restored = handle.metadata();
        assert_eq!(restored.status, TaskStatus::Failed);
        assert_eq!(restored.failure_reason.as_deref(), Some("upstream rejected"));
    }
}
