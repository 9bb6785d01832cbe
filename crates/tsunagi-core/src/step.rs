//! Step body trait, step definitions and retry configuration.

use crate::context::StepExecutionContext;
use crate::error::WorkflowError;
use crate::result::ExecutionResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::time::Duration;

/// Type-safe step name wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the step name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of a step definition node, stable within a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub usize);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Retry policy applied by retry middleware.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// No retry - fail immediately on error.
    #[default]
    None,
    /// Fixed delay between retries.
    Fixed {
        /// Maximum number of retry attempts.
        max_retries: u32,
        /// Delay between each retry.
        delay: Duration,
    },
    /// Exponential backoff with configurable parameters.
    ExponentialBackoff {
        /// Maximum number of retry attempts.
        max_retries: u32,
        /// Initial delay before first retry.
        initial_delay: Duration,
        /// Maximum delay cap.
        max_delay: Duration,
        /// Multiplier for each retry.
        multiplier: u32,
    },
}

/// Error returned when [`RetryPolicy`] configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicyError(pub &'static str);

impl fmt::Display for RetryPolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RetryPolicyError {}

impl RetryPolicy {
    /// Creates a fixed retry policy.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        RetryPolicy::Fixed { max_retries, delay }
    }

    /// Creates an exponential backoff retry policy with default settings.
    ///
    /// Uses `multiplier=2` and `max_delay=60s`.
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay: Duration::from_secs(60),
            multiplier: 2,
        }
    }

    /// Creates an exponential backoff retry policy with custom settings.
    ///
    /// # Errors
    ///
    /// Returns [`RetryPolicyError`] if `multiplier` is 0 or greater than 10,
    /// or if `max_delay` is less than `initial_delay`.
    pub fn exponential_backoff(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: u32,
    ) -> Result<Self, RetryPolicyError> {
        if multiplier == 0 {
            return Err(RetryPolicyError("multiplier must be greater than 0"));
        }
        if multiplier > 10 {
            return Err(RetryPolicyError(
                "multiplier must be 10 or less to avoid overflow",
            ));
        }
        if max_delay < initial_delay {
            return Err(RetryPolicyError("max_delay must be >= initial_delay"));
        }
        Ok(RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay,
            multiplier,
        })
    }

    /// Returns the maximum number of retries for this policy.
    pub fn max_retries(&self) -> u32 {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::Fixed { max_retries, .. } => *max_retries,
            RetryPolicy::ExponentialBackoff { max_retries, .. } => *max_retries,
        }
    }

    /// Calculates the delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryPolicy::None => None,
            RetryPolicy::Fixed { delay, .. } => Some(*delay),
            RetryPolicy::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let cap = max_delay.as_millis() as u64;
                let delay = (*multiplier as u64)
                    .checked_pow(attempt)
                    .and_then(|factor| (initial_delay.as_millis() as u64).checked_mul(factor))
                    .unwrap_or(cap);
                Some(Duration::from_millis(delay.min(cap)))
            }
        }
    }
}

/// Per-step configuration read by the built-in middleware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Maximum time allowed for one attempt. `None` means no timeout.
    pub timeout: Option<Duration>,
    /// Retry policy when the step fails.
    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            retry_policy: RetryPolicy::None,
        }
    }
}

/// A step definition node, as supplied by the definition collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Identifier of the node within its workflow definition.
    pub id: StepId,
    /// Human readable label.
    pub name: StepName,
    /// Timeout and retry configuration.
    #[serde(default)]
    pub config: StepConfig,
}

impl StepDefinition {
    /// Creates a definition with the default [`StepConfig`].
    pub fn new(id: usize, name: impl Into<StepName>) -> Self {
        Self {
            id: StepId(id),
            name: name.into(),
            config: StepConfig::default(),
        }
    }

    /// Replaces the retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.config.retry_policy = retry_policy;
        self
    }

    /// Replaces the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.timeout = timeout;
        self
    }
}

/// The body of a workflow step.
///
/// This is the innermost link of a step middleware chain. It receives the
/// same [`StepExecutionContext`] the middleware saw and may write
/// `persisted_outputs` on the current pointer.
///
/// # Examples
///
/// ```
/// use tsunagi_core::{ExecutionResult, Step, StepExecutionContext, StepName, WorkflowError};
/// use async_trait::async_trait;
///
/// #[derive(Debug)]
/// struct Greet;
///
/// #[async_trait]
/// impl Step for Greet {
///     async fn execute(
///         &self,
///         ctx: &mut StepExecutionContext<'_>,
///     ) -> Result<ExecutionResult, WorkflowError> {
///         ctx.pointer_mut().persisted_outputs = Some(serde_json::json!({ "greeted": true }));
///         Ok(ExecutionResult::outcome("hello"))
///     }
///
///     fn name(&self) -> StepName {
///         StepName::new("Greet")
///     }
/// }
/// ```
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Executes one attempt of the step.
    ///
    /// # Returns
    ///
    /// - `Ok(result)` - the attempt finished; see [`ExecutionResult::signal`]
    /// - `Err(error)` - the attempt failed; middleware may convert it
    async fn execute(
        &self,
        ctx: &mut StepExecutionContext<'_>,
    ) -> Result<ExecutionResult, WorkflowError>;

    /// Returns the step name.
    fn name(&self) -> StepName;
}
