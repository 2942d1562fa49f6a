//! # durable-tasks
//!
//! A durable execution engine for long-lived, multi-step workflows.
//!
//! A workflow body (typically a chain of agent invocations) runs as a task
//! that can:
//!
//! - **pause** for external input and be resumed later, in this process or
//!   after a restart
//! - **retry** transient failures with exponential backoff
//! - **checkpoint** its progress so completed steps are not repeated
//! - be **cancelled** cooperatively, safely racing completion and resume
//!
//! Every lifecycle change is persisted to a [`MetadataStore`], progress to a
//! [`CheckpointStore`], and an audit trail of [`TaskEvent`]s to an
//! [`EventJournal`]. [`InMemoryStore`] and [`FileStore`] implement all three.
//!
//! ## Quick start
//!
//! ```
//! use durable_tasks::{
//!     DurableTaskEngine, RetryPolicy, TaskConfiguration, TaskError, TaskPaused,
//!     WorkflowOutcome, WorkflowScope,
//! };
//! use serde_json::json;
//!
//! async fn review(scope: WorkflowScope) -> WorkflowOutcome {
//!     let draft = match scope.step("draft", || async { Ok(json!("a draft")) }).await {
//!         Ok(draft) => draft,
//!         Err(e) => return WorkflowOutcome::Failed(e),
//!     };
//!     match scope.get("approved") {
//!         Some(approved) => WorkflowOutcome::Completed(json!({ "draft": draft, "approved": approved })),
//!         None => TaskPaused::awaiting("waiting for approval", "approved").into(),
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), TaskError> {
//! let engine = DurableTaskEngine::new();
//! let config = TaskConfiguration::builder("reviewer")
//!     .retry_policy(RetryPolicy::default())
//!     .build()?;
//!
//! let handle = engine.start(config, review).await?;
//! assert!(matches!(handle.await_result().await, Err(TaskError::Paused { .. })));
//!
//! let handle = engine.resume(handle.id(), Some(json!(true))).await?;
//! assert_eq!(
//!     handle.await_result().await?,
//!     json!({ "draft": "a draft", "approved": true })
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `logging` (default): [`logging::init_logging`] installs a
//!   `tracing-subscriber` formatter filtered by `RUST_LOG`.

#![warn(missing_docs)]

pub mod constants;
pub mod domain;
pub mod engine;
pub mod error;
pub mod handle;
#[cfg(feature = "logging")]
pub mod logging;
pub mod store;
pub mod types;
pub mod workflow;

pub use domain::{Checkpoint, MetadataCell, StepRecord, TaskMetadata, TaskState};
pub use engine::{DurableTaskEngine, DurableTaskEngineBuilder, EngineConfig};
pub use error::{ConfigError, StorageError, TaskError};
pub use handle::TaskHandle;
pub use store::{
    CheckpointStore, EventJournal, FileStore, InMemoryStore, MetadataStore, TaskFilter,
};
pub use types::{
    CheckpointPolicy, ErrorCategory, RetryPolicy, RetryPolicyBuilder, TaskConfiguration,
    TaskConfigurationBuilder, TaskEvent, TaskId, TaskStatus,
};
pub use workflow::{
    TaskInterrupted, TaskPaused, Workflow, WorkflowError, WorkflowOutcome, WorkflowScope,
};
