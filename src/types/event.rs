//! Append-only task event journal records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry in a task's event journal.
///
/// Serialized as internally tagged JSON (`{"type": "paused", ...}`), one
/// event per line in file-backed journals.
///
/// # Examples
///
/// ```
/// use durable_tasks::TaskEvent;
///
/// let event = TaskEvent::paused("needs approval", Some("approval".to_string()));
/// let json = serde_json::to_value(&event).unwrap();
/// assert_eq!(json["type"], "paused");
/// assert_eq!(json["pending_key"], "approval");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// The task was created.
    Started {
        /// When it happened.
        at: DateTime<Utc>,
        /// The root agent.
        agent_name: String,
    },
    /// A workflow step finished and its output was recorded.
    StepCompleted {
        /// When it happened.
        at: DateTime<Utc>,
        /// Zero-based position of the step.
        index: usize,
        /// Step name.
        name: String,
    },
    /// An attempt failed and another is scheduled.
    Retrying {
        /// When it happened.
        at: DateTime<Utc>,
        /// 1-based retry number.
        attempt: u32,
        /// The policy's retry limit.
        max_retries: u32,
        /// The failure that triggered the retry.
        error: String,
        /// Backoff before the next attempt.
        delay_ms: u64,
    },
    /// The workflow paused.
    Paused {
        /// When it happened.
        at: DateTime<Utc>,
        /// Why it paused.
        reason: String,
        /// Scope key awaiting a value, if any.
        pending_key: Option<String>,
    },
    /// External input was supplied for a paused task.
    InputProvided {
        /// When it happened.
        at: DateTime<Utc>,
        /// Scope key the value is written to on resume.
        key: String,
        /// The value.
        value: Value,
    },
    /// The task was resumed.
    Resumed {
        /// When it happened.
        at: DateTime<Utc>,
    },
    /// The task completed.
    Completed {
        /// When it happened.
        at: DateTime<Utc>,
        /// The workflow result.
        result: Value,
    },
    /// The task failed.
    Failed {
        /// When it happened.
        at: DateTime<Utc>,
        /// The failure reason.
        reason: String,
    },
    /// The task was cancelled.
    Cancelled {
        /// When it happened.
        at: DateTime<Utc>,
    },
}

impl TaskEvent {
    pub(crate) fn started(agent_name: impl Into<String>) -> Self {
        Self::Started {
            at: Utc::now(),
            agent_name: agent_name.into(),
        }
    }

    pub(crate) fn step_completed(index: usize, name: impl Into<String>) -> Self {
        Self::StepCompleted {
            at: Utc::now(),
            index,
            name: name.into(),
        }
    }

    pub(crate) fn retrying(attempt: u32, max_retries: u32, error: String, delay_ms: u64) -> Self {
        Self::Retrying {
            at: Utc::now(),
            attempt,
            max_retries,
            error,
            delay_ms,
        }
    }

    /// Creates a `Paused` event stamped now.
    pub fn paused(reason: impl Into<String>, pending_key: Option<String>) -> Self {
        Self::Paused {
            at: Utc::now(),
            reason: reason.into(),
            pending_key,
        }
    }

    /// Creates an `InputProvided` event stamped now.
    pub fn input_provided(key: impl Into<String>, value: Value) -> Self {
        Self::InputProvided {
            at: Utc::now(),
            key: key.into(),
            value,
        }
    }

    pub(crate) fn resumed() -> Self {
        Self::Resumed { at: Utc::now() }
    }

    pub(crate) fn completed(result: Value) -> Self {
        Self::Completed {
            at: Utc::now(),
            result,
        }
    }

    pub(crate) fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            at: Utc::now(),
            reason: reason.into(),
        }
    }

    pub(crate) fn cancelled() -> Self {
        Self::Cancelled { at: Utc::now() }
    }

    /// When the event was recorded.
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Started { at, .. }
            | Self::StepCompleted { at, .. }
            | Self::Retrying { at, .. }
            | Self::Paused { at, .. }
            | Self::InputProvided { at, .. }
            | Self::Resumed { at }
            | Self::Completed { at, .. }
            | Self::Failed { at, .. }
            | Self::Cancelled { at } => *at,
        }
    }

    /// The event's tag, as written in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::StepCompleted { .. } => "step_completed",
            Self::Retrying { .. } => "retrying",
            Self::Paused { .. } => "paused",
            Self::InputProvided { .. } => "input_provided",
            Self::Resumed { .. } => "resumed",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

/// State a resume needs from the journal: the pending key of the most
/// recent pause and every input provided since it.
///
/// Events are replayed in timestamp order, since concurrent writers may
/// append them out of order.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct PendingInputs {
    pub(crate) pending_key: Option<String>,
    pub(crate) inputs: Vec<(String, Value)>,
}

impl PendingInputs {
    pub(crate) fn from_events(events: &[TaskEvent]) -> Self {
        let mut events: Vec<&TaskEvent> = events.iter().collect();
        events.sort_by_key(|e| e.at());

        let since_pause = events
            .iter()
            .rposition(|e| matches!(e, TaskEvent::Paused { .. }))
            .unwrap_or(0);

        let mut pending = Self::default();
        for event in &events[since_pause..] {
            match *event {
                TaskEvent::Paused { pending_key, .. } => {
                    pending.pending_key = pending_key.clone();
                }
                TaskEvent::InputProvided { key, value, .. } => {
                    pending.inputs.push((key.clone(), value.clone()));
                }
                TaskEvent::Resumed { .. } => {
                    pending = Self::default();
                }
                _ => {}
            }
        }
        pending
    }
}
