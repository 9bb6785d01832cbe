//! Pipeline error types.

use crate::instance::{WorkflowId, WorkflowStatus};
use crate::step::StepName;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised by step bodies, middleware and the pipeline itself.
///
/// Step bodies and middleware report failure by returning one of these.
/// Whether the pipeline catches it depends on the phase it escapes from:
/// step and pre-start errors propagate to the caller, post-complete errors
/// are handed to the lifecycle error policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WorkflowError {
    /// A step body failed permanently.
    #[error("Step failed: {step_name}, details: {details}")]
    StepError {
        /// The name of the step that failed.
        step_name: StepName,
        /// Details about the failure.
        details: String,
    },

    /// A step body failed in a way that may succeed if attempted again.
    #[error("Transient failure in step: {step_name}, details: {details}")]
    Transient {
        /// The name of the step that failed.
        step_name: StepName,
        /// Details about the failure.
        details: String,
    },

    /// A step exceeded its timeout duration.
    #[error("Timeout occurred in step: {step_name}")]
    Timeout {
        /// The name of the step that timed out.
        step_name: StepName,
    },

    /// A middleware failed on its own account.
    #[error("Middleware '{middleware}' failed: {details}")]
    Middleware {
        /// Name of the failing middleware.
        middleware: String,
        /// Details about the failure.
        details: String,
    },

    /// The lifecycle error policy itself failed.
    ///
    /// This is a configuration defect, never a per-workflow error.
    #[error("Lifecycle error policy failed: {0}")]
    ErrorPolicy(String),

    /// A step context referenced a pointer the instance does not have.
    #[error("Execution pointer {index} not found in workflow {workflow_id}")]
    PointerNotFound {
        /// The workflow that was searched.
        workflow_id: WorkflowId,
        /// The requested pointer index.
        index: usize,
    },

    /// A pipeline operation was invoked on an instance in the wrong status.
    #[error("Workflow {workflow_id} is {actual}, expected {expected}")]
    InvalidStatus {
        /// The offending workflow.
        workflow_id: WorkflowId,
        /// Human readable description of the accepted statuses.
        expected: &'static str,
        /// The status the instance was actually in.
        actual: WorkflowStatus,
    },

    /// The pipeline configuration is invalid.
    #[error("Invalid pipeline configuration: {0}")]
    Configuration(String),
}

impl WorkflowError {
    /// Creates a [`WorkflowError::Middleware`] error.
    pub fn middleware(middleware: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Middleware {
            middleware: middleware.into(),
            details: details.into(),
        }
    }

    /// Returns `true` if attempting the step again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }
}

/// Broad category of a recorded step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The step body failed.
    Step,
    /// The step (or a middleware acting on its behalf) ran out of time.
    Timeout,
    /// A middleware failed.
    Middleware,
    /// The pipeline or an instance was misconfigured.
    Configuration,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Step => write!(f, "step"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Middleware => write!(f, "middleware"),
            FailureKind::Configuration => write!(f, "configuration"),
        }
    }
}

/// A failure captured inside an [`ExecutionResult`](crate::ExecutionResult).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    /// What kind of failure occurred.
    pub kind: FailureKind,
    /// Human readable message.
    pub message: String,
    /// Whether the scheduler should attempt the step again.
    pub retryable: bool,
}

impl StepFailure {
    /// Creates a failure that must not be retried.
    pub fn permanent(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a failure that is eligible for retry.
    pub fn transient(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: true,
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.message)
    }
}

impl From<&WorkflowError> for StepFailure {
    fn from(error: &WorkflowError) -> Self {
        let kind = match error {
            WorkflowError::StepError { .. } | WorkflowError::Transient { .. } => FailureKind::Step,
            WorkflowError::Timeout { .. } => FailureKind::Timeout,
            WorkflowError::Middleware { .. } => FailureKind::Middleware,
            _ => FailureKind::Configuration,
        };
        Self {
            kind,
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}
