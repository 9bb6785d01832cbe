//! Outcome of a single step invocation.

use crate::error::StepFailure;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// The result a step body or a short-circuiting middleware produces.
///
/// All three fields may be populated at once for diagnostics; the scheduler
/// only acts on the primary [`ResultSignal`] returned by [`signal`](Self::signal).
///
/// # Examples
///
/// ```
/// use tsunagi_core::{ExecutionResult, FailureKind, ResultSignal, StepFailure};
/// use std::time::Duration;
///
/// let done = ExecutionResult::outcome("ok");
/// assert_eq!(done.signal(), ResultSignal::Proceed);
///
/// let retry = ExecutionResult::retry(
///     StepFailure::transient(FailureKind::Timeout, "slow upstream"),
///     Duration::from_secs(5),
/// );
/// assert_eq!(retry.signal(), ResultSignal::Retry);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// The value produced by the step, if any.
    pub outcome: Option<Value>,
    /// A captured failure, if the attempt failed.
    pub failure: Option<StepFailure>,
    /// Re-invoke the step after this delay instead of treating it as finished.
    pub proceed_after: Option<Duration>,
}

/// What the scheduler should do with an [`ExecutionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSignal {
    /// The step finished; move on.
    Proceed,
    /// Invoke the step again after `proceed_after`.
    Sleep,
    /// The attempt failed and a retry should be scheduled.
    Retry,
    /// The attempt failed and must not be retried.
    Fail,
}

impl ExecutionResult {
    /// Finished without producing a value.
    pub fn next() -> Self {
        Self::default()
    }

    /// Finished with a produced value.
    pub fn outcome(value: impl Into<Value>) -> Self {
        Self {
            outcome: Some(value.into()),
            ..Self::default()
        }
    }

    /// Not finished; invoke again after `after`.
    pub fn sleep(after: Duration) -> Self {
        Self {
            proceed_after: Some(after),
            ..Self::default()
        }
    }

    /// Failed with the given failure.
    pub fn failed(failure: StepFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }

    /// Failed, retry after `after`. The failure is marked retryable.
    pub fn retry(mut failure: StepFailure, after: Duration) -> Self {
        failure.retryable = true;
        Self {
            failure: Some(failure),
            proceed_after: Some(after),
            ..Self::default()
        }
    }

    /// Returns `true` if the result carries a retry-eligible failure.
    pub fn is_retry(&self) -> bool {
        self.failure.as_ref().is_some_and(|f| f.retryable)
    }

    /// Returns the primary signal.
    ///
    /// A retryable failure wins over everything else, then a permanent
    /// failure, then `proceed_after`.
    pub fn signal(&self) -> ResultSignal {
        match (&self.failure, self.proceed_after) {
            (Some(failure), _) if failure.retryable => ResultSignal::Retry,
            (Some(_), _) => ResultSignal::Fail,
            (None, Some(_)) => ResultSignal::Sleep,
            (None, None) => ResultSignal::Proceed,
        }
    }
}
