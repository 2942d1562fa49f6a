//! Task records: live metadata with its state cell, and progress checkpoints.

pub mod checkpoint;
pub mod metadata;

pub use checkpoint::{Checkpoint, StepRecord};
pub use metadata::{MetadataCell, TaskMetadata, TaskState};
