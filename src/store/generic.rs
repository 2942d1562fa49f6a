//! Generic task store over any [`StorageBackend`].
//!
//! [`GenericStore`] implements [`MetadataStore`], [`CheckpointStore`], and
//! [`EventJournal`] on top of a backend: JSON serialization at the storage
//! boundary, stale-write protection for metadata, and JSON-lines parsing for
//! the journal.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::checkpoint::Checkpoint;
use crate::domain::metadata::TaskMetadata;
use crate::store::backend::{
    checkpoint_key, journal_key, metadata_key, StorageBackend, StorageError, METADATA_PREFIX,
};
use crate::store::{CheckpointStore, EventJournal, MetadataStore, TaskFilter};
use crate::types::event::TaskEvent;
use crate::types::task_id::TaskId;

/// Task store that delegates all storage to a [`StorageBackend`].
///
/// # Type Parameters
///
/// * `B` - A [`StorageBackend`] implementation (in-memory, file system, ...)
#[derive(Debug, Default)]
pub struct GenericStore<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> GenericStore<B> {
    /// Creates a store over `backend`.
    pub fn with_backend(backend: B) -> Self {
        Self { backend }
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn serialize<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(value).map_err(|source| StorageError::Serialization {
            key: key.to_string(),
            source,
        })
    }

    fn deserialize<T: DeserializeOwned>(key: &str, data: &[u8]) -> Result<T, StorageError> {
        serde_json::from_slice(data).map_err(|source| StorageError::Serialization {
            key: key.to_string(),
            source,
        })
    }

    async fn get_optional(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match self.backend.get(key).await {
            Ok(record) => Ok(Some(record.data)),
            Err(StorageError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<B: StorageBackend> MetadataStore for GenericStore<B> {
    async fn save_metadata(&self, metadata: &TaskMetadata) -> Result<(), StorageError> {
        let key = metadata_key(&metadata.id);
        let data = Self::serialize(&key, metadata)?;

        loop {
            let expected = match self.backend.get(&key).await {
                Ok(record) => {
                    let stored: TaskMetadata = Self::deserialize(&key, &record.data)?;
                    if stored.version > metadata.version {
                        tracing::debug!(
                            task_id = %metadata.id,
                            stored_version = stored.version,
                            version = metadata.version,
                            "skipping stale metadata write"
                        );
                        return Ok(());
                    }
                    record.version
                }
                Err(StorageError::NotFound { .. }) => 0,
                Err(e) => return Err(e),
            };

            match self.backend.put_if_version(&key, &data, expected).await {
                Ok(_) => return Ok(()),
                Err(StorageError::VersionConflict { .. } | StorageError::NotFound { .. }) => {
                    tracing::trace!(task_id = %metadata.id, "metadata write raced, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn load_metadata(&self, task_id: &TaskId) -> Result<Option<TaskMetadata>, StorageError> {
        let key = metadata_key(task_id);
        self.get_optional(&key)
            .await?
            .map(|data| Self::deserialize(&key, &data))
            .transpose()
    }

    async fn list_metadata(&self, filter: &TaskFilter) -> Result<Vec<TaskMetadata>, StorageError> {
        let mut tasks = Vec::new();
        for (key, record) in self.backend.list_by_prefix(METADATA_PREFIX).await? {
            match Self::deserialize::<TaskMetadata>(&key, &record.data) {
                Ok(metadata) if filter.matches(&metadata) => tasks.push(metadata),
                Ok(_) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "skipping unreadable metadata"),
            }
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn delete_metadata(&self, task_id: &TaskId) -> Result<bool, StorageError> {
        self.backend.delete(&metadata_key(task_id)).await
    }
}

#[async_trait]
impl<B: StorageBackend> CheckpointStore for GenericStore<B> {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        let key = checkpoint_key(&checkpoint.task_id);
        let data = Self::serialize(&key, checkpoint)?;
        self.backend.put(&key, &data).await.map(|_| ())
    }

    async fn load_checkpoint(&self, task_id: &TaskId) -> Result<Option<Checkpoint>, StorageError> {
        let key = checkpoint_key(task_id);
        self.get_optional(&key)
            .await?
            .map(|data| Self::deserialize(&key, &data))
            .transpose()
    }

    async fn delete_checkpoint(&self, task_id: &TaskId) -> Result<bool, StorageError> {
        self.backend.delete(&checkpoint_key(task_id)).await
    }
}

#[async_trait]
impl<B: StorageBackend> EventJournal for GenericStore<B> {
    async fn append_event(&self, task_id: &TaskId, event: &TaskEvent) -> Result<(), StorageError> {
        let key = journal_key(task_id);
        let mut line = Self::serialize(&key, event)?;
        line.push(b'\n');
        self.backend.append(&key, &line).await
    }

    async fn events(&self, task_id: &TaskId) -> Result<Vec<TaskEvent>, StorageError> {
        let key = journal_key(task_id);
        let Some(data) = self.get_optional(&key).await? else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        for line in data.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
            match Self::deserialize(&key, line) {
                Ok(event) => events.push(event),
                // A torn final line from a crash mid-append.
                Err(e) => tracing::warn!(task_id = %task_id, error = %e, "skipping unreadable journal line"),
            }
        }
        Ok(events)
    }

    async fn delete_events(&self, task_id: &TaskId) -> Result<bool, StorageError> {
        self.backend.delete(&journal_key(task_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::status::TaskStatus;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn metadata() -> TaskMetadata {
        TaskMetadata::new(TaskId::random(), "agent", BTreeMap::new())
    }

    #[tokio::test]
    async fn save_and_load_metadata() {
        let store = InMemoryStore::new();
        let meta = metadata();
        store.save_metadata(&meta).await.unwrap();
        assert_eq!(store.load_metadata(&meta.id).await.unwrap(), Some(meta));
    }

    #[tokio::test]
    async fn stale_metadata_write_is_ignored() {
        let store = InMemoryStore::new();
        let old = metadata();
        let mut newer = old.clone();
        newer.status = TaskStatus::Running;
        newer.version = 2;

        store.save_metadata(&newer).await.unwrap();
        store.save_metadata(&old).await.unwrap();

        let loaded = store.load_metadata(&old.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Running);
        assert_eq!(loaded.version, 2);
    }

    #[tokio::test]
    async fn load_missing_is_none() {
        let store = InMemoryStore::new();
        let id = TaskId::random();
        assert!(store.load_metadata(&id).await.unwrap().is_none());
        assert!(store.load_checkpoint(&id).await.unwrap().is_none());
        assert!(store.events(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_filters_and_sorts() {
        let store = InMemoryStore::new();
        let first = metadata();
        let mut second = metadata();
        second.status = TaskStatus::Paused;
        store.save_metadata(&second).await.unwrap();
        store.save_metadata(&first).await.unwrap();

        let all = store.list_metadata(&TaskFilter::new()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].created_at <= all[1].created_at);

        let paused = store
            .list_metadata(&TaskFilter::new().with_status(TaskStatus::Paused))
            .await
            .unwrap();
        assert_eq!(paused, vec![second]);
    }

    #[tokio::test]
    async fn journal_skips_torn_lines() {
        let store = InMemoryStore::new();
        let id = TaskId::random();
        store
            .append_event(&id, &TaskEvent::started("agent"))
            .await
            .unwrap();
        store
            .backend()
            .append(&journal_key(&id), b"{\"type\":\"resu")
            .await
            .unwrap();

        let events = store.events(&id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "started");
    }

    #[tokio::test]
    async fn checkpoint_roundtrip_and_delete() {
        let store = InMemoryStore::new();
        let checkpoint = Checkpoint::empty(TaskId::random());
        store.save_checkpoint(&checkpoint).await.unwrap();
        assert_eq!(
            store.load_checkpoint(&checkpoint.task_id).await.unwrap(),
            Some(checkpoint.clone())
        );
        assert!(store.delete_checkpoint(&checkpoint.task_id).await.unwrap());
        assert!(store.load_checkpoint(&checkpoint.task_id).await.unwrap().is_none());
    }
}
