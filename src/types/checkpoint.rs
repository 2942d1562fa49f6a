//! When progress snapshots are taken.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Controls when the engine persists a [`Checkpoint`](crate::Checkpoint).
///
/// | Policy           | Per completed step | On completion | On pause / retry |
/// |------------------|--------------------|---------------|------------------|
/// | `None`           | no                 | no            | no               |
/// | `AfterRootCall`  | no                 | yes           | no               |
/// | `AfterEachAgent` | yes                | yes           | already covered  |
///
/// # Examples
///
/// ```
/// use durable_tasks::CheckpointPolicy;
///
/// let policy: CheckpointPolicy = "after_each_agent".parse().unwrap();
/// assert_eq!(policy, CheckpointPolicy::AfterEachAgent);
/// assert_eq!(policy.to_string(), "AFTER_EACH_AGENT");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointPolicy {
    /// Never snapshot.
    None,
    /// Snapshot once, when the workflow body returns a result.
    AfterRootCall,
    /// Snapshot after every completed step and on completion.
    #[default]
    AfterEachAgent,
}

impl CheckpointPolicy {
    /// Returns `true` if a snapshot is taken after every completed step.
    pub fn checkpoints_steps(&self) -> bool {
        matches!(self, Self::AfterEachAgent)
    }

    /// Returns `true` if a snapshot is taken when the body completes.
    pub fn checkpoints_completion(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for CheckpointPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::AfterRootCall => write!(f, "AFTER_ROOT_CALL"),
            Self::AfterEachAgent => write!(f, "AFTER_EACH_AGENT"),
        }
    }
}

impl FromStr for CheckpointPolicy {
    type Err = TaskError;

    /// Accepts the display names case-insensitively, with `-` or `_` separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "NONE" => Ok(Self::None),
            "AFTER_ROOT_CALL" => Ok(Self::AfterRootCall),
            "AFTER_EACH_AGENT" => Ok(Self::AfterEachAgent),
            _ => Err(TaskError::InvalidArgument(format!(
                "unknown checkpoint policy: {s}"
            ))),
        }
    }
}
