//! Shared engine state and the lifecycle operations behind the public API.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::constants::RECOVERED_PAUSE_REASON;
use crate::domain::metadata::{MetadataCell, TaskMetadata};
use crate::engine::config::EngineConfig;
use crate::engine::execution::Execution;
use crate::error::TaskError;
use crate::handle::TaskHandle;
use crate::store::{CheckpointStore, EventJournal, MetadataStore, TaskFilter};
use crate::types::configuration::TaskConfiguration;
use crate::types::event::{PendingInputs, TaskEvent};
use crate::types::status::TaskStatus;
use crate::types::task_id::TaskId;
use crate::workflow::{TaskPaused, Workflow};

/// What the engine knows about one task in this process.
#[derive(Clone)]
pub(crate) struct TaskEntry {
    pub(crate) cell: MetadataCell,
    workflow: Option<Arc<dyn Workflow>>,
    configuration: Option<TaskConfiguration>,
    cancel: CancellationToken,
}

impl TaskEntry {
    /// A task loaded from the store with no workflow body attached.
    fn detached(cell: MetadataCell) -> Self {
        Self {
            cell,
            workflow: None,
            configuration: None,
            cancel: CancellationToken::new(),
        }
    }
}

pub(crate) struct EngineInner {
    pub(crate) metadata: Arc<dyn MetadataStore>,
    pub(crate) checkpoints: Arc<dyn CheckpointStore>,
    pub(crate) journal: Arc<dyn EventJournal>,
    pub(crate) config: EngineConfig,
    pub(crate) slots: Arc<Semaphore>,
    pub(crate) tracker: TaskTracker,
    tasks: DashMap<TaskId, TaskEntry>,
    shutting_down: CancellationToken,
}

impl EngineInner {
    pub(crate) fn new(
        config: EngineConfig,
        metadata: Arc<dyn MetadataStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        journal: Arc<dyn EventJournal>,
    ) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent_tasks)),
            metadata,
            checkpoints,
            journal,
            config,
            tracker: TaskTracker::new(),
            tasks: DashMap::new(),
            shutting_down: CancellationToken::new(),
        }
    }

    fn entry(&self, task_id: &TaskId) -> Option<TaskEntry> {
        self.tasks.get(task_id).map(|e| e.value().clone())
    }

    /// The task's entry, loading its metadata from the store if this
    /// process has not seen it yet.
    async fn attach(&self, task_id: &TaskId) -> Result<TaskEntry, TaskError> {
        if let Some(entry) = self.entry(task_id) {
            return Ok(entry);
        }
        let metadata = self
            .metadata
            .load_metadata(task_id)
            .await?
            .ok_or_else(|| TaskError::not_found(task_id))?;
        let entry = self
            .tasks
            .entry(task_id.clone())
            .or_insert_with(|| TaskEntry::detached(MetadataCell::new(metadata)))
            .value()
            .clone();
        Ok(entry)
    }

    fn ensure_running(&self) -> Result<(), TaskError> {
        if self.shutting_down.is_cancelled() {
            return Err(TaskError::ShuttingDown);
        }
        Ok(())
    }

    /// Persists a metadata snapshot taken by the worker. Failures are
    /// logged; a later write with a higher version repairs the record.
    pub(crate) async fn persist(&self, metadata: &TaskMetadata) {
        if let Err(e) = self.metadata.save_metadata(metadata).await {
            tracing::error!(
                task_id = %metadata.id,
                status = %metadata.status,
                error = %e,
                "failed to persist task metadata"
            );
        }
    }

    /// Appends a journal event, logging failures.
    pub(crate) async fn record(&self, task_id: &TaskId, event: TaskEvent) {
        if let Err(e) = self.journal.append_event(task_id, &event).await {
            tracing::error!(
                task_id = %task_id,
                event = event.kind(),
                error = %e,
                "failed to append journal event"
            );
        }
    }

    pub(crate) async fn start(
        self: &Arc<Self>,
        configuration: TaskConfiguration,
        workflow: Arc<dyn Workflow>,
    ) -> Result<TaskHandle, TaskError> {
        self.ensure_running()?;

        let metadata = TaskMetadata::new(
            TaskId::random(),
            configuration.agent_name(),
            configuration.labels().clone(),
        );
        let task_id = metadata.id.clone();
        self.metadata.save_metadata(&metadata).await?;
        self.journal
            .append_event(&task_id, &TaskEvent::started(configuration.agent_name()))
            .await?;

        let cell = MetadataCell::new(metadata);
        let cancel = CancellationToken::new();
        self.tasks.insert(
            task_id.clone(),
            TaskEntry {
                cell: cell.clone(),
                workflow: Some(workflow.clone()),
                configuration: Some(configuration.clone()),
                cancel: cancel.clone(),
            },
        );

        tracing::info!(task_id = %task_id, agent = configuration.agent_name(), "task started");
        self.spawn(Execution::new(
            self.clone(),
            cell.clone(),
            workflow,
            &configuration,
            cancel,
            Vec::new(),
        ));
        Ok(TaskHandle::new(task_id, cell, self.clone()))
    }

    pub(crate) async fn resume(
        self: &Arc<Self>,
        task_id: &TaskId,
        replacement: Option<(TaskConfiguration, Arc<dyn Workflow>)>,
        resume_value: Option<Value>,
    ) -> Result<TaskHandle, TaskError> {
        self.ensure_running()?;

        let entry = self.attach(task_id).await?;
        let previous = entry.cell.state();
        let status = previous.metadata.status;
        match status {
            TaskStatus::Completed | TaskStatus::Cancelled => {
                return Err(TaskError::illegal_state(
                    task_id,
                    format!("task is {status} and cannot be resumed"),
                ));
            }
            TaskStatus::Pending | TaskStatus::Running | TaskStatus::Retrying => {
                return Err(TaskError::illegal_state(task_id, "task is already active"));
            }
            TaskStatus::Paused | TaskStatus::Failed => {}
        }

        let (configuration, workflow) = match replacement {
            Some((configuration, workflow)) => {
                if configuration.agent_name() != previous.metadata.agent_name {
                    return Err(TaskError::InvalidArgument(format!(
                        "task {task_id} belongs to agent {}, not {}",
                        previous.metadata.agent_name,
                        configuration.agent_name()
                    )));
                }
                (configuration, workflow)
            }
            None => match (entry.configuration.clone(), entry.workflow.clone()) {
                (Some(configuration), Some(workflow)) => (configuration, workflow),
                _ => {
                    return Err(TaskError::illegal_state(
                        task_id,
                        "no workflow registered for task; use resume_with",
                    ))
                }
            },
        };

        let mut inputs = Vec::new();
        let mut pending_key = None;
        if status == TaskStatus::Paused {
            let pending = PendingInputs::from_events(&self.journal.events(task_id).await?);
            pending_key = previous
                .pause
                .as_ref()
                .and_then(|p| p.pending_key.clone())
                .or(pending.pending_key);
            inputs = pending.inputs;
        }
        let resume_input = match (resume_value, pending_key) {
            (Some(value), Some(key)) => Some((key, value)),
            (Some(_), None) => {
                return Err(TaskError::InvalidArgument(format!(
                    "task {task_id} is not waiting for a resume value"
                )))
            }
            (None, _) => None,
        };
        inputs.extend(resume_input.clone());

        let metadata = entry
            .cell
            .try_transition(status, TaskStatus::Running, None)
            .ok_or_else(|| TaskError::illegal_state(task_id, "task was modified concurrently"))?;
        if let Err(e) = self.metadata.save_metadata(&metadata).await {
            let restored = match previous.pause {
                Some(pause) => entry.cell.pause(TaskStatus::Running, pause),
                None => entry.cell.try_transition(
                    TaskStatus::Running,
                    status,
                    previous.metadata.failure_reason.clone(),
                ),
            };
            if restored.is_none() {
                tracing::warn!(task_id = %task_id, "could not roll back failed resume");
            }
            return Err(e.into());
        }

        if let Some((key, value)) = resume_input {
            self.record(task_id, TaskEvent::input_provided(key, value)).await;
        }
        self.record(task_id, TaskEvent::resumed()).await;

        let cancel = CancellationToken::new();
        self.tasks.insert(
            task_id.clone(),
            TaskEntry {
                cell: entry.cell.clone(),
                workflow: Some(workflow.clone()),
                configuration: Some(configuration.clone()),
                cancel: cancel.clone(),
            },
        );

        tracing::info!(task_id = %task_id, from = %status, "task resumed");
        self.spawn(Execution::new(
            self.clone(),
            entry.cell.clone(),
            workflow,
            &configuration,
            cancel,
            inputs,
        ));
        Ok(TaskHandle::new(task_id.clone(), entry.cell, self.clone()))
    }

    pub(crate) async fn cancel(&self, task_id: &TaskId) -> bool {
        let entry = match self.attach(task_id).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(task_id = %task_id, error = %e, "cancel ignored");
                return false;
            }
        };

        loop {
            let current = entry.cell.status();
            if current.is_terminal() {
                return false;
            }
            let Some(metadata) = entry
                .cell
                .try_transition(current, TaskStatus::Cancelled, None)
            else {
                continue;
            };

            entry.cancel.cancel();
            // A concurrent resume may have installed a newer token.
            if let Some(latest) = self.entry(task_id) {
                latest.cancel.cancel();
            }
            tracing::info!(task_id = %task_id, from = %current, "task cancelled");
            self.persist(&metadata).await;
            self.record(task_id, TaskEvent::cancelled()).await;
            return true;
        }
    }

    pub(crate) async fn provide_input(
        &self,
        task_id: &TaskId,
        key: String,
        value: Value,
    ) -> Result<(), TaskError> {
        if key.trim().is_empty() {
            return Err(TaskError::InvalidArgument(
                "input key must not be blank".to_string(),
            ));
        }
        let entry = self.attach(task_id).await?;
        let status = entry.cell.status();
        if status != TaskStatus::Paused {
            return Err(TaskError::illegal_state(
                task_id,
                format!("input can only be provided while paused, task is {status}"),
            ));
        }
        self.journal
            .append_event(task_id, &TaskEvent::input_provided(key.clone(), value))
            .await?;
        tracing::debug!(task_id = %task_id, key = %key, "input provided");
        Ok(())
    }

    pub(crate) async fn recover_interrupted_tasks(&self) -> Result<Vec<TaskId>, TaskError> {
        let stored = self.metadata.list_metadata(&TaskFilter::new()).await?;
        let mut recovered = Vec::new();

        for metadata in stored {
            let status = metadata.status;
            if !status.is_active() {
                continue;
            }
            let task_id = metadata.id.clone();
            let cell = {
                match self.tasks.entry(task_id.clone()) {
                    // Owned by a live execution in this process.
                    Entry::Occupied(_) => continue,
                    Entry::Vacant(vacant) => {
                        let cell = MetadataCell::new(metadata);
                        vacant.insert(TaskEntry::detached(cell.clone()));
                        cell
                    }
                }
            };

            let Some(paused) = cell.pause(status, TaskPaused::new(RECOVERED_PAUSE_REASON)) else {
                continue;
            };
            self.metadata.save_metadata(&paused).await?;
            self.record(&task_id, TaskEvent::paused(RECOVERED_PAUSE_REASON, None))
                .await;
            tracing::warn!(task_id = %task_id, from = %status, "recovered interrupted task as paused");
            recovered.push(task_id);
        }
        Ok(recovered)
    }

    pub(crate) async fn metadata_of(&self, task_id: &TaskId) -> Result<TaskMetadata, TaskError> {
        if let Some(entry) = self.entry(task_id) {
            return Ok(entry.cell.snapshot());
        }
        self.metadata
            .load_metadata(task_id)
            .await?
            .ok_or_else(|| TaskError::not_found(task_id))
    }

    pub(crate) async fn events(&self, task_id: &TaskId) -> Result<Vec<TaskEvent>, TaskError> {
        if self.entry(task_id).is_none() && self.metadata.load_metadata(task_id).await?.is_none() {
            return Err(TaskError::not_found(task_id));
        }
        Ok(self.journal.events(task_id).await?)
    }

    pub(crate) async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskMetadata>, TaskError> {
        let mut tasks: BTreeMap<TaskId, TaskMetadata> = self
            .metadata
            .list_metadata(&TaskFilter::new())
            .await?
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();
        // Live cells may be ahead of the store.
        for entry in self.tasks.iter() {
            let snapshot = entry.cell.snapshot();
            tasks.insert(snapshot.id.clone(), snapshot);
        }

        let mut matching: Vec<TaskMetadata> =
            tasks.into_values().filter(|m| filter.matches(m)).collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matching)
    }

    pub(crate) fn handle(self: &Arc<Self>, task_id: &TaskId) -> Option<TaskHandle> {
        self.entry(task_id)
            .map(|entry| TaskHandle::new(task_id.clone(), entry.cell, self.clone()))
    }

    pub(crate) async fn cleanup(&self, task_id: &TaskId) -> Result<(), TaskError> {
        let entry = self.attach(task_id).await?;
        let status = entry.cell.status();
        if !status.is_terminal() {
            return Err(TaskError::illegal_state(
                task_id,
                format!("only terminal tasks can be cleaned up, task is {status}"),
            ));
        }
        self.checkpoints.delete_checkpoint(task_id).await?;
        self.journal.delete_events(task_id).await?;
        self.metadata.delete_metadata(task_id).await?;
        self.tasks.remove(task_id);
        tracing::debug!(task_id = %task_id, "task cleaned up");
        Ok(())
    }

    pub(crate) async fn shutdown(&self) -> bool {
        self.shutting_down.cancel();
        self.tracker.close();

        let timeout = self.config.shutdown_timeout();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok() {
            tracing::info!("engine shut down cleanly");
            return true;
        }

        tracing::warn!(
            in_flight = self.tracker.len(),
            timeout_ms = self.config.shutdown_timeout_ms,
            "shutdown timed out, interrupting running tasks"
        );
        for entry in self.tasks.iter() {
            entry.cancel.cancel();
        }
        false
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.is_cancelled()
    }

    fn spawn(&self, execution: Execution) {
        self.tracker.spawn(execution.run());
    }
}
