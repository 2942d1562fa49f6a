//! Per-task configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::TaskError;
use crate::types::checkpoint::CheckpointPolicy;
use crate::types::retry::{RetryPolicy, NO_RETRY};

/// Immutable configuration for one task.
///
/// Only `agent_name` is required. An absent checkpoint policy falls back to
/// the engine's default; an absent retry policy means the task is never
/// retried.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use durable_tasks::{CheckpointPolicy, RetryPolicy, TaskConfiguration};
///
/// let config = TaskConfiguration::builder("research-agent")
///     .checkpoint_policy(CheckpointPolicy::AfterRootCall)
///     .retry_policy(RetryPolicy::default())
///     .label("tenant", "acme")
///     .timeout(Duration::from_secs(600))
///     .build()
///     .unwrap();
///
/// assert_eq!(config.agent_name(), "research-agent");
/// assert_eq!(config.labels()["tenant"], "acme");
///
/// assert!(TaskConfiguration::builder(" ").build().is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TaskConfiguration {
    agent_name: String,
    checkpoint_policy: Option<CheckpointPolicy>,
    retry_policy: Option<RetryPolicy>,
    labels: BTreeMap<String, String>,
    timeout: Option<Duration>,
}

impl TaskConfiguration {
    /// Starts a builder for a task run by `agent_name`.
    pub fn builder(agent_name: impl Into<String>) -> TaskConfigurationBuilder {
        TaskConfigurationBuilder {
            agent_name: agent_name.into(),
            checkpoint_policy: None,
            retry_policy: None,
            labels: BTreeMap::new(),
            timeout: None,
        }
    }

    /// Name of the root agent driving the task.
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// The explicitly chosen checkpoint policy, if any.
    pub fn checkpoint_policy(&self) -> Option<CheckpointPolicy> {
        self.checkpoint_policy
    }

    /// The explicitly chosen retry policy, if any.
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }

    /// The retry policy to apply: the configured one, or [`RetryPolicy::NONE`].
    pub fn effective_retry_policy(&self) -> &RetryPolicy {
        self.retry_policy.as_ref().unwrap_or(&NO_RETRY)
    }

    /// Labels copied onto the task's metadata.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Wall-clock limit for one execution, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Builder for [`TaskConfiguration`].
#[derive(Debug, Clone)]
pub struct TaskConfigurationBuilder {
    agent_name: String,
    checkpoint_policy: Option<CheckpointPolicy>,
    retry_policy: Option<RetryPolicy>,
    labels: BTreeMap<String, String>,
    timeout: Option<Duration>,
}

impl TaskConfigurationBuilder {
    /// Sets the checkpoint policy.
    pub fn checkpoint_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.checkpoint_policy = Some(policy);
        self
    }

    /// Sets the retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Adds one label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Adds several labels.
    pub fn labels<K, V>(mut self, labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.labels
            .extend(labels.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the execution timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<TaskConfiguration, TaskError> {
        if self.agent_name.trim().is_empty() {
            return Err(TaskError::InvalidArgument(
                "agent name must not be blank".to_string(),
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(TaskError::InvalidArgument(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(TaskConfiguration {
            agent_name: self.agent_name,
            checkpoint_policy: self.checkpoint_policy,
            retry_policy: self.retry_policy,
            labels: self.labels,
            timeout: self.timeout,
        })
    }
}
