//! Value types shared by the engine, stores, and callers.

pub mod checkpoint;
pub mod configuration;
pub mod event;
pub mod retry;
pub mod status;
pub mod task_id;

pub use checkpoint::CheckpointPolicy;
pub use configuration::{TaskConfiguration, TaskConfigurationBuilder};
pub use event::TaskEvent;
pub use retry::{ErrorCategory, RetryPolicy, RetryPolicyBuilder};
pub use status::TaskStatus;
pub use task_id::TaskId;
