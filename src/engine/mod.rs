//! The durable task engine.
//!
//! [`DurableTaskEngine`] starts workflow bodies as tasks, runs them on a
//! bounded pool of worker slots, and drives each one through its lifecycle:
//!
//! ```text
//! PENDING -> RUNNING -> COMPLETED
//!               |  \-> PAUSED  --resume--> RUNNING
//!               |  \-> FAILED  --resume--> RUNNING
//!               \-> RETRYING -> RUNNING
//! any non-terminal status --cancel--> CANCELLED
//! ```
//!
//! Metadata is persisted after every transition, checkpoints after every
//! step (depending on the [`CheckpointPolicy`](crate::CheckpointPolicy)),
//! and every lifecycle event is appended to the task's journal.
//!
//! # Examples
//!
//! ```
//! use durable_tasks::{DurableTaskEngine, TaskConfiguration, WorkflowOutcome, WorkflowScope};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), durable_tasks::TaskError> {
//! let engine = DurableTaskEngine::new();
//! let config = TaskConfiguration::builder("summarizer").build()?;
//!
//! let handle = engine
//!     .start(config, |scope: WorkflowScope| async move {
//!         match scope.step("fetch", || async { Ok(json!("text")) }).await {
//!             Ok(text) => WorkflowOutcome::Completed(json!({ "summary": text })),
//!             Err(e) => WorkflowOutcome::Failed(e),
//!         }
//!     })
//!     .await?;
//!
//! assert_eq!(handle.await_result().await?, json!({ "summary": "text" }));
//! # Ok(())
//! # }
//! ```

pub mod config;
mod execution;
mod inner;

use std::sync::Arc;

use serde_json::Value;

use crate::domain::metadata::TaskMetadata;
use crate::error::TaskError;
use crate::handle::TaskHandle;
use crate::store::{CheckpointStore, EventJournal, InMemoryStore, MetadataStore, TaskFilter};
use crate::types::configuration::TaskConfiguration;
use crate::types::event::TaskEvent;
use crate::types::status::TaskStatus;
use crate::types::task_id::TaskId;
use crate::workflow::Workflow;

pub use config::EngineConfig;
pub(crate) use inner::EngineInner;

/// Runs, pauses, resumes, retries, and cancels durable tasks.
///
/// Cloning is cheap; clones share the same tasks, stores, and worker slots.
#[derive(Clone)]
pub struct DurableTaskEngine {
    inner: Arc<EngineInner>,
}

impl DurableTaskEngine {
    /// An engine with default configuration over a fresh [`InMemoryStore`].
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            inner: Arc::new(EngineInner::new(
                EngineConfig::default(),
                store.clone(),
                store.clone(),
                store,
            )),
        }
    }

    /// Starts building an engine with custom configuration or stores.
    pub fn builder() -> DurableTaskEngineBuilder {
        DurableTaskEngineBuilder::default()
    }

    /// The configuration the engine runs with.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Creates a task for `workflow` and schedules its first execution.
    ///
    /// The task is persisted as `PENDING` before this returns; it moves to
    /// `RUNNING` once a worker slot is free.
    ///
    /// # Errors
    ///
    /// - [`TaskError::ShuttingDown`] after [`shutdown`](Self::shutdown)
    /// - [`TaskError::Store`] if the initial metadata or journal write fails
    pub async fn start<W>(
        &self,
        configuration: TaskConfiguration,
        workflow: W,
    ) -> Result<TaskHandle, TaskError>
    where
        W: Workflow + 'static,
    {
        self.inner.start(configuration, Arc::new(workflow)).await
    }

    /// Resumes a `PAUSED` or `FAILED` task with the workflow it was started
    /// with, continuing from its last checkpoint.
    ///
    /// `resume_value` is written into the scope under the key the workflow
    /// paused on, together with any input supplied through
    /// [`provide_input`](Self::provide_input) since the pause.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if the task is unknown
    /// - [`TaskError::IllegalState`] if the task is active, `COMPLETED`, or
    ///   `CANCELLED`, or if this process has no workflow for it (use
    ///   [`resume_with`](Self::resume_with))
    /// - [`TaskError::InvalidArgument`] if a value is given but the task is
    ///   not waiting on a key
    pub async fn resume(
        &self,
        task_id: &TaskId,
        resume_value: Option<Value>,
    ) -> Result<TaskHandle, TaskError> {
        self.inner.resume(task_id, None, resume_value).await
    }

    /// Like [`resume`](Self::resume), supplying the workflow and configuration.
    ///
    /// Needed after a restart, when the engine knows the task only from its
    /// stores. The configuration's agent name must match the task's.
    pub async fn resume_with<W>(
        &self,
        task_id: &TaskId,
        configuration: TaskConfiguration,
        workflow: W,
        resume_value: Option<Value>,
    ) -> Result<TaskHandle, TaskError>
    where
        W: Workflow + 'static,
    {
        let workflow: Arc<dyn Workflow> = Arc::new(workflow);
        self.inner
            .resume(task_id, Some((configuration, workflow)), resume_value)
            .await
    }

    /// Cancels a task that is not yet terminal.
    ///
    /// Returns `true` if this call moved the task to `CANCELLED`, and
    /// `false` if the task is unknown or already `COMPLETED`, `FAILED`, or
    /// `CANCELLED`. A running body is interrupted at its next step.
    pub async fn cancel(&self, task_id: &TaskId) -> bool {
        self.inner.cancel(task_id).await
    }

    /// Records input for a `PAUSED` task, applied to its scope on resume.
    pub async fn provide_input(
        &self,
        task_id: &TaskId,
        key: impl Into<String>,
        value: Value,
    ) -> Result<(), TaskError> {
        self.inner.provide_input(task_id, key.into(), value).await
    }

    /// Pauses every stored task left `PENDING`, `RUNNING`, or `RETRYING` by
    /// a previous process, so it can be resumed with
    /// [`resume_with`](Self::resume_with). Returns the recovered task IDs.
    ///
    /// Call once at startup, before starting new work.
    pub async fn recover_interrupted_tasks(&self) -> Result<Vec<TaskId>, TaskError> {
        self.inner.recover_interrupted_tasks().await
    }

    /// Current status of a task.
    pub async fn status(&self, task_id: &TaskId) -> Result<TaskStatus, TaskError> {
        Ok(self.inner.metadata_of(task_id).await?.status)
    }

    /// Current metadata of a task.
    pub async fn metadata(&self, task_id: &TaskId) -> Result<TaskMetadata, TaskError> {
        self.inner.metadata_of(task_id).await
    }

    /// The task's journal, oldest event first.
    pub async fn events(&self, task_id: &TaskId) -> Result<Vec<TaskEvent>, TaskError> {
        self.inner.events(task_id).await
    }

    /// Tasks matching `filter`, oldest first.
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskMetadata>, TaskError> {
        self.inner.list_tasks(filter).await
    }

    /// A handle to a task this engine has loaded, started, or recovered.
    pub fn handle(&self, task_id: &TaskId) -> Option<TaskHandle> {
        self.inner.handle(task_id)
    }

    /// Deletes a terminal task's metadata, checkpoint, and journal.
    pub async fn cleanup(&self, task_id: &TaskId) -> Result<(), TaskError> {
        self.inner.cleanup(task_id).await
    }

    /// Stops accepting work and waits up to the configured shutdown timeout
    /// for in-flight executions.
    ///
    /// Returns `true` if every execution finished in time. Otherwise the
    /// remaining bodies are interrupted at their next step and `false` is
    /// returned; their tasks keep their last persisted status and can be
    /// picked up by [`recover_interrupted_tasks`](Self::recover_interrupted_tasks).
    pub async fn shutdown(&self) -> bool {
        self.inner.shutdown().await
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.is_shutting_down()
    }
}

impl Default for DurableTaskEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DurableTaskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableTaskEngine")
            .field("config", &self.inner.config)
            .field("shutting_down", &self.inner.is_shutting_down())
            .finish_non_exhaustive()
    }
}

/// Builder for [`DurableTaskEngine`].
///
/// Stores that are not set default to one shared [`InMemoryStore`].
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use durable_tasks::{DurableTaskEngine, EngineConfig, FileStore};
///
/// # async fn demo() -> Result<(), durable_tasks::TaskError> {
/// let store = Arc::new(FileStore::open("/var/lib/durable-tasks").await?);
/// let engine = DurableTaskEngine::builder()
///     .config(EngineConfig::load()?)
///     .store(store)
///     .build()?;
/// engine.recover_interrupted_tasks().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct DurableTaskEngineBuilder {
    config: EngineConfig,
    metadata: Option<Arc<dyn MetadataStore>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    journal: Option<Arc<dyn EventJournal>>,
}

impl DurableTaskEngineBuilder {
    /// Sets the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses one store for metadata, checkpoints, and the journal.
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: MetadataStore + CheckpointStore + EventJournal + 'static,
    {
        self.metadata = Some(store.clone());
        self.checkpoints = Some(store.clone());
        self.journal = Some(store);
        self
    }

    /// Sets the metadata store.
    pub fn metadata_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(store);
        self
    }

    /// Sets the checkpoint store.
    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Sets the event journal.
    pub fn event_journal(mut self, journal: Arc<dyn EventJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// [`TaskError::Config`] if the configuration is invalid.
    pub fn build(self) -> Result<DurableTaskEngine, TaskError> {
        self.config.validate()?;

        let fallback = Arc::new(InMemoryStore::new());
        let metadata = self
            .metadata
            .unwrap_or_else(|| fallback.clone() as Arc<dyn MetadataStore>);
        let checkpoints = self
            .checkpoints
            .unwrap_or_else(|| fallback.clone() as Arc<dyn CheckpointStore>);
        let journal = self
            .journal
            .unwrap_or_else(|| fallback as Arc<dyn EventJournal>);

        Ok(DurableTaskEngine {
            inner: Arc::new(EngineInner::new(self.config, metadata, checkpoints, journal)),
        })
    }
}

impl std::fmt::Debug for DurableTaskEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableTaskEngineBuilder")
            .field("config", &self.config)
            .field("metadata_store", &self.metadata.is_some())
            .field("checkpoint_store", &self.checkpoints.is_some())
            .field("event_journal", &self.journal.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{TaskPaused, WorkflowOutcome, WorkflowScope};
    use serde_json::json;

    #[test]
    fn builder_rejects_invalid_config() {
        let err = DurableTaskEngine::builder()
            .config(EngineConfig {
                max_concurrent_tasks: 0,
                ..EngineConfig::default()
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, TaskError::Config(_)));
    }

    #[tokio::test]
    async fn unknown_task_lookups() {
        let engine = DurableTaskEngine::new();
        let id = TaskId::random();
        assert!(matches!(engine.status(&id).await, Err(TaskError::NotFound { .. })));
        assert!(matches!(engine.events(&id).await, Err(TaskError::NotFound { .. })));
        assert!(matches!(engine.resume(&id, None).await, Err(TaskError::NotFound { .. })));
        assert!(!engine.cancel(&id).await);
        assert!(engine.handle(&id).is_none());
    }

    #[tokio::test]
    async fn start_after_shutdown_is_rejected() {
        let engine = DurableTaskEngine::new();
        assert!(engine.shutdown().await);
        assert!(engine.is_shutting_down());
        let config = TaskConfiguration::builder("agent").build().unwrap();
        let err = engine
            .start(config, |_scope: WorkflowScope| async {
                WorkflowOutcome::Completed(json!(null))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::ShuttingDown));
    }

    #[tokio::test]
    async fn resume_value_requires_pending_key() {
        let engine = DurableTaskEngine::new();
        let config = TaskConfiguration::builder("agent").build().unwrap();
        let handle = engine
            .start(config, |_scope: WorkflowScope| async {
                WorkflowOutcome::Paused(TaskPaused::new("waiting"))
            })
            .await
            .unwrap();
        assert!(matches!(handle.await_result().await, Err(TaskError::Paused { .. })));

        let err = engine
            .resume(handle.id(), Some(json!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidArgument(_)));
        assert_eq!(handle.status(), TaskStatus::Paused);
    }

    #[tokio::test]
    async fn resume_with_rejects_other_agent() {
        let engine = DurableTaskEngine::new();
        let config = TaskConfiguration::builder("writer").build().unwrap();
        let body = |_scope: WorkflowScope| async { WorkflowOutcome::Paused(TaskPaused::new("wait")) };
        let handle = engine.start(config, body).await.unwrap();
        let _ = handle.await_result().await;

        let other = TaskConfiguration::builder("reviewer").build().unwrap();
        let err = engine
            .resume_with(handle.id(), other, body, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidArgument(_)));
    }
}
