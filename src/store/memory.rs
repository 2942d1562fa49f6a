//! In-memory storage backend.
//!
//! [`InMemoryBackend`] is a thread-safe [`StorageBackend`] over
//! `DashMap<String, (Vec<u8>, u64)>`. It holds no domain logic; wrap it in
//! a [`GenericStore`](crate::store::GenericStore) (or use the
//! [`InMemoryStore`](crate::store::InMemoryStore) alias) to get the task
//! stores.
//!
//! # Concurrency
//!
//! `DashMap` gives shard-level locking. `put_if_version` and `append` run
//! under the entry lock, so they are atomic per key.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::store::backend::{StorageBackend, StorageError, VersionedRecord};

/// Thread-safe in-memory storage backend.
///
/// # Examples
///
/// ```
/// use durable_tasks::store::memory::InMemoryBackend;
///
/// let backend = InMemoryBackend::new();
/// assert!(backend.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: DashMap<String, (Vec<u8>, u64)>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError> {
        let entry = self.data.get(key).ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })?;
        let (data, version) = entry.value();
        Ok(VersionedRecord {
            data: data.clone(),
            version: *version,
        })
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError> {
        let mut entry = self.data.entry(key.to_string()).or_insert((Vec::new(), 0));
        let (stored, version) = entry.value_mut();
        *stored = data.to_vec();
        *version += 1;
        Ok(*version)
    }

    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        match self.data.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                if expected_version != 0 {
                    return Err(StorageError::NotFound {
                        key: key.to_string(),
                    });
                }
                vacant.insert((data.to_vec(), 1));
                Ok(1)
            }
            Entry::Occupied(mut occupied) => {
                let (stored, version) = occupied.get_mut();
                if *version != expected_version {
                    return Err(StorageError::VersionConflict {
                        key: key.to_string(),
                        expected: expected_version,
                        actual: *version,
                    });
                }
                *stored = data.to_vec();
                *version += 1;
                Ok(*version)
            }
        }
    }

    async fn append(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let mut entry = self.data.entry(key.to_string()).or_insert((Vec::new(), 0));
        let (stored, version) = entry.value_mut();
        stored.extend_from_slice(data);
        *version += 1;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.remove(key).is_some())
    }

    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, StorageError> {
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| {
                let (data, version) = entry.value();
                (
                    entry.key().clone(),
                    VersionedRecord {
                        data: data.clone(),
                        version: *version,
                    },
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_increments_version() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.put("k", b"a").await.unwrap(), 1);
        assert_eq!(backend.put("k", b"b").await.unwrap(), 2);
        let record = backend.get("k").await.unwrap();
        assert_eq!(record.data, b"b");
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let backend = InMemoryBackend::new();
        assert!(matches!(
            backend.get("nope").await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn put_if_version_zero_creates_once() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.put_if_version("k", b"a", 0).await.unwrap(), 1);
        assert!(matches!(
            backend.put_if_version("k", b"b", 0).await,
            Err(StorageError::VersionConflict {
                expected: 0,
                actual: 1,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn put_if_version_detects_conflict() {
        let backend = InMemoryBackend::new();
        backend.put("k", b"a").await.unwrap();
        assert_eq!(backend.put_if_version("k", b"b", 1).await.unwrap(), 2);
        assert!(backend.put_if_version("k", b"c", 1).await.is_err());
        assert_eq!(backend.get("k").await.unwrap().data, b"b");
    }

    #[tokio::test]
    async fn put_if_version_missing_key_nonzero_expected() {
        let backend = InMemoryBackend::new();
        assert!(matches!(
            backend.put_if_version("k", b"a", 4).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn append_concatenates() {
        let backend = InMemoryBackend::new();
        backend.append("j", b"one\n").await.unwrap();
        backend.append("j", b"two\n").await.unwrap();
        assert_eq!(backend.get("j").await.unwrap().data, b"one\ntwo\n");
    }

    #[tokio::test]
    async fn list_and_delete() {
        let backend = InMemoryBackend::new();
        backend.put("metadata/a.json", b"1").await.unwrap();
        backend.put("metadata/b.json", b"2").await.unwrap();
        backend.put("journal/a.jsonl", b"3").await.unwrap();

        let mut keys: Vec<String> = backend
            .list_by_prefix("metadata/")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["metadata/a.json", "metadata/b.json"]);

        assert!(backend.delete("metadata/a.json").await.unwrap());
        assert!(!backend.delete("metadata/a.json").await.unwrap());
        assert_eq!(backend.len(), 2);
    }
}
