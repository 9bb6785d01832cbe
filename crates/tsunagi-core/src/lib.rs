//! Core types and middleware traits for the tsunagi execution pipeline.
//!
//! This crate does not depend on an async runtime. Middleware authors and
//! schedulers depend on it for the data model and the extension traits;
//! the `tsunagi` crate provides the coordinator and built-in middleware.
//!
//! # Core Types
//!
//! - [`ExecutionResult`] - Outcome of one step attempt
//! - [`WorkflowInstance`] / [`ExecutionPointer`] - Execution state
//! - [`StepExecutionContext`] - Borrowed view for one step attempt
//! - [`WorkflowError`] - Error types raised through the chains
//!
//! # Extension Traits
//!
//! - [`Step`] - A step body, the innermost link of a step chain
//! - [`StepMiddleware`] - Interceptor around a step attempt
//! - [`WorkflowMiddleware`] - Interceptor around workflow start or completion
//! - [`LifecycleErrorPolicy`] - Handling of post-complete middleware errors

mod context;
mod data;
mod error;
mod instance;
mod middleware;
mod result;
mod step;

pub use context::StepExecutionContext;
pub use data::WorkflowData;
pub use error::{FailureKind, StepFailure, WorkflowError};
pub use instance::{ExecutionPointer, PointerStatus, WorkflowId, WorkflowInstance, WorkflowStatus};
pub use middleware::{
    BoxFuture, ErrorAction, LifecycleErrorPolicy, MiddlewareFailure, Next, StepMiddleware,
    WorkflowMiddleware, WorkflowMiddlewarePhase, WorkflowNext,
};
pub use result::{ExecutionResult, ResultSignal};
pub use step::{RetryPolicy, RetryPolicyError, Step, StepConfig, StepDefinition, StepId, StepName};
