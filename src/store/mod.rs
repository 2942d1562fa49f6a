//! Task stores: metadata, checkpoints, and the event journal.
//!
//! The engine talks to three narrow async traits:
//!
//! - [`MetadataStore`] - latest [`TaskMetadata`] per task, with stale writes
//!   (lower `version`) ignored.
//! - [`CheckpointStore`] - latest [`Checkpoint`] per task.
//! - [`EventJournal`] - append-only [`TaskEvent`] log per task.
//!
//! [`GenericStore`] implements all three on top of any
//! [`StorageBackend`](backend::StorageBackend). Two backends ship with the
//! crate:
//!
//! | Alias            | Backend                                | Survives restart |
//! |------------------|----------------------------------------|------------------|
//! | [`InMemoryStore`] | [`InMemoryBackend`](memory::InMemoryBackend) | no         |
//! | [`FileStore`]     | [`FileBackend`](file::FileBackend)           | yes        |
//!
//! Stores give at-least-once durability: the engine writes after each
//! transition, and a crash between finishing a step and saving its
//! checkpoint makes that step run again on resume.

pub mod backend;
pub mod file;
pub mod generic;
pub mod memory;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::checkpoint::Checkpoint;
use crate::domain::metadata::TaskMetadata;
use crate::types::event::TaskEvent;
use crate::types::status::TaskStatus;
use crate::types::task_id::TaskId;

pub use backend::{StorageBackend, StorageError, VersionedRecord};
pub use file::FileBackend;
pub use generic::GenericStore;
pub use memory::InMemoryBackend;

/// Store of the latest metadata per task.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Saves `metadata`, unless a record with a higher version is already stored.
    async fn save_metadata(&self, metadata: &TaskMetadata) -> Result<(), StorageError>;

    /// Loads the stored metadata, if any.
    async fn load_metadata(&self, task_id: &TaskId) -> Result<Option<TaskMetadata>, StorageError>;

    /// Lists stored metadata matching `filter`, oldest first.
    async fn list_metadata(&self, filter: &TaskFilter) -> Result<Vec<TaskMetadata>, StorageError>;

    /// Deletes the stored metadata. Returns `false` if there was none.
    async fn delete_metadata(&self, task_id: &TaskId) -> Result<bool, StorageError>;
}

/// Store of the latest checkpoint per task.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Replaces the task's checkpoint.
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StorageError>;

    /// Loads the task's checkpoint, if any.
    async fn load_checkpoint(&self, task_id: &TaskId) -> Result<Option<Checkpoint>, StorageError>;

    /// Deletes the task's checkpoint. Returns `false` if there was none.
    async fn delete_checkpoint(&self, task_id: &TaskId) -> Result<bool, StorageError>;
}

/// Append-only per-task event log.
#[async_trait]
pub trait EventJournal: Send + Sync {
    /// Appends one event.
    async fn append_event(&self, task_id: &TaskId, event: &TaskEvent) -> Result<(), StorageError>;

    /// All events of the task, oldest first. Unknown tasks have none.
    async fn events(&self, task_id: &TaskId) -> Result<Vec<TaskEvent>, StorageError>;

    /// Deletes the task's journal. Returns `false` if there was none.
    async fn delete_events(&self, task_id: &TaskId) -> Result<bool, StorageError>;
}

/// Selects tasks by status and labels.
///
/// An empty filter matches everything. Every label in the filter must be
/// present on the task with the same value.
///
/// # Examples
///
/// ```
/// use durable_tasks::store::TaskFilter;
/// use durable_tasks::TaskStatus;
///
/// let filter = TaskFilter::new()
///     .with_status(TaskStatus::Paused)
///     .with_label("tenant", "acme");
/// assert_eq!(filter.status, Some(TaskStatus::Paused));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Required status, if any.
    pub status: Option<TaskStatus>,
    /// Required labels.
    pub labels: BTreeMap<String, String>,
}

impl TaskFilter {
    /// A filter matching every task.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Requires a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Returns `true` if `metadata` satisfies the filter.
    pub fn matches(&self, metadata: &TaskMetadata) -> bool {
        if self.status.is_some_and(|s| s != metadata.status) {
            return false;
        }
        self.labels
            .iter()
            .all(|(k, v)| metadata.labels.get(k) == Some(v))
    }
}

/// Non-persistent store for tests and single-process use.
pub type InMemoryStore = GenericStore<InMemoryBackend>;

/// Store persisting JSON files under a directory.
pub type FileStore = GenericStore<FileBackend>;

impl InMemoryStore {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        GenericStore::with_backend(InMemoryBackend::new())
    }
}

impl FileStore {
    /// Opens (creating if needed) a file store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Ok(GenericStore::with_backend(FileBackend::open(root).await?))
    }
}
