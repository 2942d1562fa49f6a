//! Defaults, file names, and environment variable names.

/// Configuration file read by [`EngineConfig::load`](crate::EngineConfig::load).
pub const CONFIG_FILE_NAME: &str = "durable-tasks.toml";

/// Default upper bound on concurrently executing workflow bodies.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 64;

/// Default time [`shutdown`](crate::DurableTaskEngine::shutdown) waits for
/// in-flight executions before interrupting them.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 30_000;

/// Overrides `max_concurrent_tasks`.
pub const ENV_MAX_CONCURRENT_TASKS: &str = "DURABLE_TASKS_MAX_CONCURRENT_TASKS";

/// Overrides `default_checkpoint_policy` (`NONE`, `AFTER_ROOT_CALL`, `AFTER_EACH_AGENT`).
pub const ENV_DEFAULT_CHECKPOINT_POLICY: &str = "DURABLE_TASKS_DEFAULT_CHECKPOINT_POLICY";

/// Overrides `shutdown_timeout_ms`.
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "DURABLE_TASKS_SHUTDOWN_TIMEOUT_MS";

/// Pause reason recorded by [`recover_interrupted_tasks`](crate::DurableTaskEngine::recover_interrupted_tasks).
pub const RECOVERED_PAUSE_REASON: &str = "recovered after process restart";
