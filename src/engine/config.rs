//! Engine configuration.
//!
//! Configuration can be loaded from:
//! 1. TOML file (`durable-tasks.toml`)
//! 2. Environment variables (with `DURABLE_TASKS_` prefix)
//!
//! Environment variables override TOML configuration.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! [engine]
//! max_concurrent_tasks = 16
//! default_checkpoint_policy = "AFTER_ROOT_CALL"
//! shutdown_timeout_ms = 10000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::constants::{
    CONFIG_FILE_NAME, DEFAULT_MAX_CONCURRENT_TASKS, DEFAULT_SHUTDOWN_TIMEOUT_MS,
    ENV_DEFAULT_CHECKPOINT_POLICY, ENV_MAX_CONCURRENT_TASKS, ENV_SHUTDOWN_TIMEOUT_MS,
};
use crate::types::checkpoint::CheckpointPolicy;

/// Engine-wide settings.
///
/// | Field                       | Default            |
/// |-----------------------------|--------------------|
/// | `max_concurrent_tasks`      | 64                 |
/// | `default_checkpoint_policy` | `AFTER_EACH_AGENT` |
/// | `shutdown_timeout_ms`       | 30000              |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on workflow bodies executing at once.
    pub max_concurrent_tasks: usize,

    /// Checkpoint policy for tasks whose configuration does not choose one.
    pub default_checkpoint_policy: CheckpointPolicy,

    /// How long shutdown waits for in-flight executions.
    pub shutdown_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            default_checkpoint_policy: CheckpointPolicy::default(),
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. `durable-tasks.toml` in the working directory, if present
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(CONFIG_FILE_NAME) {
            Ok(contents) => Self::from_toml(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(ConfigError::Io {
                    path: CONFIG_FILE_NAME.to_string(),
                    error: e.to_string(),
                })
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML content (the `[engine]` table).
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize)]
        struct FullConfig {
            #[serde(default)]
            engine: EngineConfig,
        }

        let full: FullConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(full.engine)
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup. Unparsable values
    /// are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(ENV_MAX_CONCURRENT_TASKS) {
            match value.trim().parse() {
                Ok(v) => self.max_concurrent_tasks = v,
                Err(_) => tracing::warn!(var = ENV_MAX_CONCURRENT_TASKS, value = %value, "ignoring invalid override"),
            }
        }

        if let Some(value) = lookup(ENV_DEFAULT_CHECKPOINT_POLICY) {
            match value.parse() {
                Ok(v) => self.default_checkpoint_policy = v,
                Err(_) => tracing::warn!(var = ENV_DEFAULT_CHECKPOINT_POLICY, value = %value, "ignoring invalid override"),
            }
        }

        if let Some(value) = lookup(ENV_SHUTDOWN_TIMEOUT_MS) {
            match value.trim().parse() {
                Ok(v) => self.shutdown_timeout_ms = v,
                Err(_) => tracing::warn!(var = ENV_SHUTDOWN_TIMEOUT_MS, value = %value, "ignoring invalid override"),
            }
        }
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_tasks > Semaphore::MAX_PERMITS {
            return Err(ConfigError::Invalid(format!(
                "max_concurrent_tasks must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        Ok(())
    }

    /// `shutdown_timeout_ms` as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// IO error reading configuration file.
    #[error("failed to read config file {path}: {error}")]
    Io {
        /// Path to the configuration file.
        path: String,
        /// Error message.
        error: String,
    },
    /// Parse error in configuration.
    #[error("failed to parse config: {0}")]
    Parse(String),
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}
