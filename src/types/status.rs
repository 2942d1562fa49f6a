//! Task lifecycle status.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a durable task.
///
/// `Completed` and `Cancelled` are hard-terminal: nothing leaves them.
/// `Failed` is soft-terminal: it is terminal for result delivery and
/// [`is_terminal`](Self::is_terminal), but an explicit resume may move it
/// back to `Running`.
///
/// ```text
/// Pending  -> Running, Cancelled
/// Running  -> Paused, Retrying, Completed, Failed, Cancelled
/// Retrying -> Running, Failed, Cancelled
/// Paused   -> Running, Cancelled
/// Failed   -> Running (resume only)
/// Completed, Cancelled -> (none)
/// ```
///
/// Transition legality is enforced by
/// [`MetadataCell`](crate::MetadataCell), not here.
///
/// # Examples
///
/// ```
/// use durable_tasks::TaskStatus;
///
/// assert!(TaskStatus::Failed.is_terminal());
/// assert!(!TaskStatus::Failed.is_hard_terminal());
/// assert!(TaskStatus::Cancelled.is_hard_terminal());
/// assert_eq!(TaskStatus::Retrying.to_string(), "RETRYING");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, not yet picked up by a worker.
    Pending,
    /// The workflow body is executing.
    Running,
    /// Waiting for an explicit resume, usually with external input.
    Paused,
    /// Backing off before the next attempt.
    Retrying,
    /// Ended with an error (soft-terminal).
    Failed,
    /// Ended with a result (hard-terminal).
    Completed,
    /// Cancelled by a caller (hard-terminal).
    Cancelled,
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Pending,
        Self::Running,
        Self::Paused,
        Self::Retrying,
        Self::Failed,
        Self::Completed,
        Self::Cancelled,
    ];

    /// Returns `true` for `Completed`, `Failed`, and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` for `Completed` and `Cancelled`.
    pub fn is_hard_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Returns `true` while a worker owns the task (`Pending`, `Running`, `Retrying`).
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running | Self::Retrying)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Retrying => write!(f, "RETRYING"),
            Self::Failed => write!(f, "FAILED"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_serde() {
        for status in TaskStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }

    #[test]
    fn hard_terminal_is_subset_of_terminal() {
        for status in TaskStatus::ALL {
            if status.is_hard_terminal() {
                assert!(status.is_terminal());
            }
        }
    }

    #[test]
    fn active_and_terminal_are_disjoint() {
        for status in TaskStatus::ALL {
            assert!(!(status.is_active() && status.is_terminal()), "{status}");
        }
        assert!(!TaskStatus::Paused.is_active());
        assert!(!TaskStatus::Paused.is_terminal());
    }
}
