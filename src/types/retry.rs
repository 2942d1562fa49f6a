//! Retry eligibility and exponential backoff.
//!
//! A [`RetryPolicy`] answers two questions for the engine: is this failure
//! worth another attempt ([`is_retryable`](RetryPolicy::is_retryable)), and
//! how long to wait before it ([`delay_for_attempt`](RetryPolicy::delay_for_attempt)).
//!
//! # Defaults
//!
//! | Field                | Default                 |
//! |----------------------|-------------------------|
//! | `max_retries`        | 3                       |
//! | `initial_delay`      | 1 s                     |
//! | `backoff_multiplier` | 2.0                     |
//! | `max_delay`          | zero (uncapped)         |
//! | `retryable`          | empty (retry any error) |

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use crate::error::TaskError;
use crate::workflow::TaskPaused;

/// A named predicate over an error, used to decide retry eligibility.
///
/// Usually built with [`ErrorCategory::of`], which matches one concrete
/// error type by downcasting.
///
/// # Examples
///
/// ```
/// use durable_tasks::ErrorCategory;
///
/// let io = ErrorCategory::of::<std::io::Error>();
/// let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
/// assert!(io.matches(&err));
/// ```
#[derive(Clone, Copy)]
pub struct ErrorCategory {
    name: &'static str,
    matcher: fn(&(dyn StdError + 'static)) -> bool,
}

fn is_type<E: StdError + 'static>(err: &(dyn StdError + 'static)) -> bool {
    err.is::<E>()
}

impl ErrorCategory {
    /// Matches errors whose concrete type is `E`.
    pub fn of<E: StdError + 'static>() -> Self {
        Self {
            name: std::any::type_name::<E>(),
            matcher: is_type::<E>,
        }
    }

    /// Matches errors accepted by an arbitrary predicate.
    pub const fn custom(name: &'static str, matcher: fn(&(dyn StdError + 'static)) -> bool) -> Self {
        Self { name, matcher }
    }

    /// The category's name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` if this single error (not its sources) belongs to the category.
    pub fn matches(&self, err: &(dyn StdError + 'static)) -> bool {
        (self.matcher)(err)
    }
}

impl fmt::Debug for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorCategory").field(&self.name).finish()
    }
}

impl PartialEq for ErrorCategory {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ErrorCategory {}

/// Retry eligibility and backoff configuration for a task.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use durable_tasks::RetryPolicy;
///
/// let policy = RetryPolicy::builder()
///     .max_retries(2)
///     .initial_delay(Duration::from_secs(1))
///     .backoff_multiplier(2.0)
///     .max_delay(Duration::from_secs(3))
///     .build()
///     .unwrap();
///
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
/// assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(3));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
    backoff_multiplier: f64,
    max_delay: Duration,
    retryable: Vec<ErrorCategory>,
}

pub(crate) static NO_RETRY: RetryPolicy = RetryPolicy::NONE;

impl RetryPolicy {
    /// Never retries; all delays are zero.
    pub const NONE: Self = Self {
        max_retries: 0,
        initial_delay: Duration::ZERO,
        backoff_multiplier: 1.0,
        max_delay: Duration::ZERO,
        retryable: Vec::new(),
    };

    /// Starts a builder with the default settings.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Maximum number of retries after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the first retry.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Factor applied to the delay on each subsequent retry.
    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Upper bound on any single delay; zero means uncapped.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Configured retryable categories; empty means every error is retryable.
    pub fn retryable(&self) -> &[ErrorCategory] {
        &self.retryable
    }

    /// Decides whether `error` is eligible for another attempt.
    ///
    /// The full source chain is inspected. A [`TaskPaused`] anywhere in it
    /// is never retryable, even if a configured category also matches.
    /// Otherwise an empty category set accepts everything, and a non-empty
    /// set accepts the error if any link of the chain matches any category.
    ///
    /// Pass an [`anyhow::Error`] as `&*err`.
    pub fn is_retryable(&self, error: &(dyn StdError + 'static)) -> bool {
        let chain = || {
            std::iter::successors(Some(error), |e: &&(dyn StdError + 'static)| (*e).source())
        };

        if chain().any(|e| e.is::<TaskPaused>()) {
            return false;
        }
        if self.retryable.is_empty() {
            return true;
        }
        chain().any(|e| self.retryable.iter().any(|category| category.matches(e)))
    }

    /// Backoff delay before retry number `attempt` (1-based).
    ///
    /// `initial_delay * backoff_multiplier^(attempt - 1)`, saturating at
    /// [`Duration::MAX`] and clamped to `max_delay` when that is non-zero.
    /// Attempts `0` and `1` return `initial_delay` unchanged.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 || self.initial_delay.is_zero() {
            return self.initial_delay;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);

        if self.max_delay.is_zero() {
            delay
        } else {
            delay.min(self.max_delay)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::ZERO,
            retryable: Vec::new(),
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Sets the maximum number of retries.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Sets the delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Sets the backoff multiplier. Must be finite and at least `1.0`.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.policy.backoff_multiplier = multiplier;
        self
    }

    /// Caps every delay. Zero means uncapped.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Retries only errors of type `E` (may be called repeatedly).
    pub fn retry_on<E: StdError + 'static>(self) -> Self {
        self.retry_on_category(ErrorCategory::of::<E>())
    }

    /// Retries only errors in `category` (may be called repeatedly).
    pub fn retry_on_category(mut self, category: ErrorCategory) -> Self {
        if !self.policy.retryable.contains(&category) {
            self.policy.retryable.push(category);
        }
        self
    }

    /// Validates and builds the policy.
    pub fn build(self) -> Result<RetryPolicy, TaskError> {
        let multiplier = self.policy.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(TaskError::InvalidArgument(format!(
                "backoff multiplier must be finite and >= 1.0, got {multiplier}"
            )));
        }
        Ok(self.policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, thiserror::Error)]
    #[error("transient")]
    struct Transient;

    #[derive(Debug, thiserror::Error)]
    #[error("wrapped")]
    struct Wrapper(#[source] Transient);

    #[test]
    fn none_policy_has_zero_delays() {
        assert_eq!(RetryPolicy::NONE.max_retries(), 0);
        assert_eq!(RetryPolicy::NONE.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(RetryPolicy::NONE.delay_for_attempt(10), Duration::ZERO);
    }

    #[test]
    fn default_policy_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn huge_attempt_saturates() {
        let policy = RetryPolicy::builder()
            .backoff_multiplier(10.0)
            .build()
            .unwrap();
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::MAX);
    }

    #[test]
    fn rejects_bad_multiplier() {
        assert!(RetryPolicy::builder().backoff_multiplier(0.5).build().is_err());
        assert!(RetryPolicy::builder()
            .backoff_multiplier(f64::NAN)
            .build()
            .is_err());
        assert!(RetryPolicy::builder()
            .backoff_multiplier(f64::INFINITY)
            .build()
            .is_err());
    }

    #[test]
    fn category_matches_in_source_chain() {
        let policy = RetryPolicy::builder().retry_on::<Transient>().build().unwrap();
        assert!(policy.is_retryable(&Wrapper(Transient)));
        assert!(!policy.is_retryable(&std::io::Error::other("nope")));
    }

    #[test]
    fn anyhow_context_is_walked() {
        let policy = RetryPolicy::builder().retry_on::<Transient>().build().unwrap();
        let err = anyhow::Error::from(Transient).context("calling agent");
        assert!(policy.is_retryable(&*err));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("agent asked to wait")]
    struct PausedInside(#[source] TaskPaused);

    #[test]
    fn pause_in_chain_is_never_retryable() {
        let policy = RetryPolicy::builder()
            .retry_on_category(ErrorCategory::custom("all", |_| true))
            .build()
            .unwrap();
        let err = anyhow::Error::from(PausedInside(TaskPaused::new("waiting")));
        assert!(!policy.is_retryable(&*err));
        assert!(!policy.is_retryable(&TaskPaused::new("waiting")));
    }

    #[test]
    fn empty_category_set_retries_any_other_error() {
        let policy = RetryPolicy::default();
        assert!(policy.retryable().is_empty());
        assert!(policy.is_retryable(&std::io::Error::other("disk")));
        let err = anyhow::anyhow!("plain failure").context("calling agent");
        assert!(policy.is_retryable(&*err));
    }

    #[test]
    fn duplicate_categories_are_collapsed() {
        let policy = RetryPolicy::builder()
            .retry_on::<Transient>()
            .retry_on::<Transient>()
            .build()
            .unwrap();
        assert_eq!(policy.retryable().len(), 1);
    }
}
