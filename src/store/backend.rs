//! Low-level key-value storage backend trait and supporting types.
//!
//! The [`StorageBackend`] trait defines the contract every storage engine
//! implements: [`get`](StorageBackend::get), [`put`](StorageBackend::put),
//! [`put_if_version`](StorageBackend::put_if_version),
//! [`append`](StorageBackend::append), [`delete`](StorageBackend::delete),
//! and [`list_by_prefix`](StorageBackend::list_by_prefix).
//!
//! Backends are dumb KV stores. Serialization, stale-write protection, and
//! journal parsing live in [`GenericStore`](crate::store::GenericStore).
//!
//! # Key Structure
//!
//! Keys are `/`-separated relative paths of the form `{kind}/{task_id}.{ext}`:
//! `metadata/{id}.json`, `checkpoints/{id}.json`, `journal/{id}.jsonl`.
//! Task IDs never contain `/`, so listing `metadata/` yields exactly one key
//! per task.
//!
//! # Versioning
//!
//! Each stored record carries a monotonic `u64` version starting at 1,
//! incremented on every successful write. [`put_if_version`](StorageBackend::put_if_version)
//! provides compare-and-swap semantics; an expected version of `0` means
//! "the key must not exist yet".

use async_trait::async_trait;
use thiserror::Error;

use crate::types::task_id::TaskId;

/// A stored value with its version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRecord {
    /// Raw bytes.
    pub data: Vec<u8>,
    /// Monotonic version, starting at 1.
    pub version: u64,
}

/// Errors from storage backends and stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The key does not exist.
    #[error("key not found: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// A compare-and-swap write saw a different version.
    #[error("version conflict on key {key}: expected {expected}, found {actual}")]
    VersionConflict {
        /// The contested key.
        key: String,
        /// Version the writer expected.
        expected: u64,
        /// Version actually stored.
        actual: u64,
    },

    /// The key cannot be mapped onto the backend.
    #[error("invalid key: {key}")]
    InvalidKey {
        /// The rejected key.
        key: String,
    },

    /// A record could not be serialized or deserialized.
    #[error("serialization failed for {key}: {source}")]
    Serialization {
        /// The affected key.
        key: String,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem failure.
    #[error("io error on {path}: {source}")]
    Io {
        /// The affected path.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Any other backend failure, for backends outside this crate.
    #[error("backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },
}

/// Dumb versioned key-value storage.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Reads a record. Missing keys yield [`StorageError::NotFound`].
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError>;

    /// Writes unconditionally, returning the new version.
    async fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError>;

    /// Writes only if the stored version equals `expected_version`
    /// (`0` = key absent), returning the new version.
    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StorageError>;

    /// Appends `data` to the record, creating it if missing.
    async fn append(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Deletes a record. Returns `false` if it did not exist.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Lists every record whose key starts with `prefix`.
    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, StorageError>;
}

/// Prefix shared by all metadata keys.
pub const METADATA_PREFIX: &str = "metadata/";

/// Key of a task's metadata record.
pub fn metadata_key(task_id: &TaskId) -> String {
    format!("{METADATA_PREFIX}{task_id}.json")
}

/// Key of a task's latest checkpoint.
pub fn checkpoint_key(task_id: &TaskId) -> String {
    format!("checkpoints/{task_id}.json")
}

/// Key of a task's event journal.
pub fn journal_key(task_id: &TaskId) -> String {
    format!("journal/{task_id}.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- StorageError Display tests ----

    #[test]
    fn storage_error_display_not_found() {
        let err = StorageError::NotFound {
            key: "metadata/t-1.json".to_string(),
        };
        assert_eq!(err.to_string(), "key not found: metadata/t-1.json");
    }

    #[test]
    fn storage_error_display_version_conflict() {
        let err = StorageError::VersionConflict {
            key: "metadata/t-2.json".to_string(),
            expected: 3,
            actual: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("metadata/t-2.json"));
        assert!(msg.contains("expected 3"));
        assert!(msg.contains("found 5"));
    }

    // ---- StorageError source() tests ----

    #[test]
    fn storage_error_source_io() {
        let err = StorageError::Io {
            path: "/tmp/x".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("denied"));
    }

    #[test]
    fn storage_error_source_not_found_returns_none() {
        let err = StorageError::NotFound {
            key: "k".to_string(),
        };
        assert!(std::error::Error::source(&err).is_none());
    }

    // ---- key helpers ----

    #[test]
    fn keys_are_grouped_by_kind() {
        let id = TaskId::new("abc").unwrap();
        assert_eq!(metadata_key(&id), "metadata/abc.json");
        assert_eq!(checkpoint_key(&id), "checkpoints/abc.json");
        assert_eq!(journal_key(&id), "journal/abc.jsonl");
        assert!(metadata_key(&id).starts_with(METADATA_PREFIX));
    }
}
