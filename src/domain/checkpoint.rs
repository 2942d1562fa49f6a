//! Progress snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::task_id::TaskId;

/// Output of one completed workflow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// The step name passed to [`WorkflowScope::step`](crate::WorkflowScope::step).
    pub name: String,
    /// The step's serialized output.
    pub output: Value,
}

/// Snapshot of a workflow scope, sufficient to continue after the last
/// completed step.
///
/// On resume or retry the scope replays `steps` in order: a step whose name
/// matches the next recorded one returns the recorded output without
/// running again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The task the snapshot belongs to.
    pub task_id: TaskId,
    /// Completed steps, in execution order.
    pub steps: Vec<StepRecord>,
    /// The scope's key/value state.
    pub values: BTreeMap<String, Value>,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Creates an empty checkpoint for `task_id`.
    pub fn empty(task_id: TaskId) -> Self {
        Self {
            task_id,
            steps: Vec::new(),
            values: BTreeMap::new(),
            taken_at: Utc::now(),
        }
    }

    /// Names of completed steps, in order.
    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name.as_str())
    }
}
