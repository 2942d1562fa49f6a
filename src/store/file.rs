//! File-system storage backend.
//!
//! [`FileBackend`] maps each key onto a file below a root directory, so the
//! default layout is:
//!
//! ```text
//! <root>/metadata/<task-id>.json
//! <root>/checkpoints/<task-id>.json
//! <root>/journal/<task-id>.jsonl
//! ```
//!
//! Whole-record writes go to a `.tmp` sibling first and are renamed into
//! place, so readers never observe a half-written record. Appends are
//! flushed and synced before returning. Every operation on a key holds that
//! key's async lock.
//!
//! Record versions are tracked in memory. A file that already exists when
//! the backend is opened starts at version 1. Only one process may use a
//! root directory at a time.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::store::backend::{StorageBackend, StorageError, VersionedRecord};

const TMP_SUFFIX: &str = ".tmp";

/// Storage backend keeping one file per key under a root directory.
///
/// # Examples
///
/// ```no_run
/// use durable_tasks::store::file::FileBackend;
///
/// # async fn demo() -> Result<(), durable_tasks::store::StorageError> {
/// let backend = FileBackend::open("/var/lib/durable-tasks").await?;
/// assert!(backend.root().ends_with("durable-tasks"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    versions: DashMap<String, u64>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileBackend {
    /// Opens (creating if needed) a backend rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| io_error(&root, e))?;
        Ok(Self {
            root,
            versions: DashMap::new(),
            locks: DashMap::new(),
        })
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key.ends_with(TMP_SUFFIX)
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.entry(key.to_string()).or_default().value().clone()
    }

    /// Version of `key` as known to this backend; `0` if the file is absent.
    async fn current_version(&self, key: &str, path: &Path) -> Result<u64, StorageError> {
        if let Some(version) = self.versions.get(key) {
            return Ok(*version);
        }
        match tokio::fs::try_exists(path).await {
            Ok(true) => Ok(1),
            Ok(false) => Ok(0),
            Err(e) => Err(io_error(path, e)),
        }
    }

    async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn write_versioned(
        &self,
        key: &str,
        path: &Path,
        data: &[u8],
        current: u64,
    ) -> Result<u64, StorageError> {
        Self::write_atomic(path, data).await?;
        let next = current + 1;
        self.versions.insert(key.to_string(), next);
        Ok(next)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError> {
        let path = self.resolve(key)?;
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(e) => return Err(io_error(&path, e)),
        };
        let version = self.current_version(key, &path).await?.max(1);
        Ok(VersionedRecord { data, version })
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError> {
        let path = self.resolve(key)?;
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let current = self.current_version(key, &path).await?;
        self.write_versioned(key, &path, data, current).await
    }

    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        let path = self.resolve(key)?;
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let current = self.current_version(key, &path).await?;
        if current == 0 && expected_version != 0 {
            return Err(StorageError::NotFound {
                key: key.to_string(),
            });
        }
        if current != expected_version {
            return Err(StorageError::VersionConflict {
                key: key.to_string(),
                expected: expected_version,
                actual: current,
            });
        }
        self.write_versioned(key, &path, data, current).await
    }

    async fn append(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        let current = self.current_version(key, &path).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        file.write_all(data).await.map_err(|e| io_error(&path, e))?;
        file.flush().await.map_err(|e| io_error(&path, e))?;
        file.sync_data().await.map_err(|e| io_error(&path, e))?;
        self.versions.insert(key.to_string(), current + 1);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.resolve(key)?;
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        self.versions.remove(key);
        let removed = match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(io_error(&path, e)),
        };
        // Only this call and the map hold the lock: no writer is waiting on it.
        self.locks
            .remove_if(key, |_, held| Arc::strong_count(held) == 2);
        Ok(removed)
    }

    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, StorageError> {
        let (dir, name_prefix) = prefix.rsplit_once('/').unwrap_or(("", prefix));
        let dir_path = if dir.is_empty() {
            self.root.clone()
        } else {
            self.resolve(dir)?
        };

        let mut entries = match tokio::fs::read_dir(&dir_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir_path, e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&dir_path, e))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !name.starts_with(name_prefix) || name.ends_with(TMP_SUFFIX) {
                continue;
            }
            let is_file = entry
                .file_type()
                .await
                .map_err(|e| io_error(&entry.path(), e))?
                .is_file();
            if is_file {
                keys.push(if dir.is_empty() {
                    name
                } else {
                    format!("{dir}/{name}")
                });
            }
        }

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            match self.get(&key).await {
                Ok(record) => records.push((key, record)),
                // Deleted between listing and reading.
                Err(StorageError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn backend() -> (tempfile::TempDir, FileBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).await.unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn put_get_roundtrip_creates_directories() {
        let (dir, backend) = backend().await;
        backend.put("metadata/a.json", b"{}").await.unwrap();
        assert!(dir.path().join("metadata").join("a.json").is_file());
        let record = backend.get("metadata/a.json").await.unwrap();
        assert_eq!(record.data, b"{}".to_vec());
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn delete_releases_key_lock() {
        let (_dir, backend) = backend().await;
        backend.put("metadata/a.json", b"{}").await.unwrap();
        backend.append("events/a.jsonl", b"{}\n").await.unwrap();
        assert_eq!(backend.locks.len(), 2);

        assert!(backend.delete("metadata/a.json").await.unwrap());
        assert!(backend.delete("events/a.jsonl").await.unwrap());
        assert!(!backend.delete("checkpoints/a.json").await.unwrap());
        assert!(backend.locks.is_empty());
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let (_dir, backend) = backend().await;
        for key in ["../x", "/abs", "a/../b", "", "metadata/a.json.tmp"] {
            assert!(
                matches!(backend.put(key, b"1").await, Err(StorageError::InvalidKey { .. })),
                "{key}"
            );
        }
    }

    #[tokio::test]
    async fn cas_semantics_match_memory_backend() {
        let (_dir, backend) = backend().await;
        assert_eq!(backend.put_if_version("k.json", b"a", 0).await.unwrap(), 1);
        assert!(matches!(
            backend.put_if_version("k.json", b"b", 0).await,
            Err(StorageError::VersionConflict { .. })
        ));
        assert_eq!(backend.put_if_version("k.json", b"b", 1).await.unwrap(), 2);
        assert!(matches!(
            backend.put_if_version("other.json", b"b", 3).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn existing_files_start_at_version_one() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = FileBackend::open(dir.path()).await.unwrap();
            backend.put("metadata/a.json", b"1").await.unwrap();
            backend.put("metadata/a.json", b"2").await.unwrap();
        }
        let reopened = FileBackend::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get("metadata/a.json").await.unwrap().version, 1);
        assert_eq!(
            reopened
                .put_if_version("metadata/a.json", b"3", 1)
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn append_and_list() {
        let (_dir, backend) = backend().await;
        backend.append("journal/a.jsonl", b"1\n").await.unwrap();
        backend.append("journal/a.jsonl", b"2\n").await.unwrap();
        backend.put("metadata/a.json", b"x").await.unwrap();

        let listed = backend.list_by_prefix("journal/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "journal/a.jsonl");
        assert_eq!(listed[0].1.data, b"1\n2\n".to_vec());

        assert!(backend.list_by_prefix("checkpoints/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let (_dir, backend) = backend().await;
        backend.put("checkpoints/a.json", b"x").await.unwrap();
        assert!(backend.delete("checkpoints/a.json").await.unwrap());
        assert!(!backend.delete("checkpoints/a.json").await.unwrap());
        assert!(matches!(
            backend.get("checkpoints/a.json").await,
            Err(StorageError::NotFound { .. })
        ));
    }
}
