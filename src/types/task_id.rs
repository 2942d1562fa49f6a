//! Opaque task identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;

/// Unique identifier of a durable task.
///
/// Compared by value. Generated IDs are UUIDv4 strings; caller-supplied IDs
/// must be non-blank and must not contain path separators, because stores
/// use the ID as part of a storage key.
///
/// # Examples
///
/// ```
/// use durable_tasks::TaskId;
///
/// let id = TaskId::new("order-42").unwrap();
/// assert_eq!(id.as_str(), "order-42");
/// assert_eq!(id, "order-42".parse().unwrap());
///
/// assert!(TaskId::new("   ").is_err());
/// assert_ne!(TaskId::random(), TaskId::random());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a task ID from a caller-supplied value.
    ///
    /// Returns [`TaskError::InvalidArgument`] if the value is blank, is `.`
    /// or `..`, or contains `/` or `\`.
    pub fn new(value: impl Into<String>) -> Result<Self, TaskError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(TaskError::InvalidArgument(
                "task id must not be blank".to_string(),
            ));
        }
        if value == "." || value == ".." || value.contains(['/', '\\']) {
            return Err(TaskError::InvalidArgument(format!(
                "task id must not be a path: {value}"
            )));
        }
        Ok(Self(value))
    }

    /// Generates a fresh random task ID.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
