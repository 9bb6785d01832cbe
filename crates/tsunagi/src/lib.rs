//! Middleware pipeline for workflow step and lifecycle execution.
//!
//! A scheduler hands each workflow instance to a [`Pipeline`] three times:
//! once before admitting it, once per step attempt, and once after it
//! reached a terminal status. The pipeline wraps each of these in the
//! registered middleware, outermost first.
//!
//! # Example
//!
//! ```rust
//! use tsunagi::prelude::*;
//! use async_trait::async_trait;
//!
//! #[derive(Debug)]
//! struct Reserve;
//!
//! #[async_trait]
//! impl Step for Reserve {
//!     async fn execute(
//!         &self,
//!         _ctx: &mut StepExecutionContext<'_>,
//!     ) -> Result<ExecutionResult, WorkflowError> {
//!         Ok(ExecutionResult::outcome("reserved"))
//!     }
//!
//!     fn name(&self) -> StepName {
//!         StepName::new("Reserve")
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), WorkflowError> {
//!     let pipeline = Pipeline::builder()
//!         .step_middleware(RetryMiddleware::new())
//!         .step_middleware(TimeoutMiddleware::new())
//!         .workflow_middleware(WorkflowSummaryMiddleware)
//!         .build();
//!
//!     let step = StepDefinition::new(0, "reserve");
//!     let mut workflow = WorkflowInstance::new("order", 1, ());
//!     pipeline.run_pre_start(&mut workflow).await?;
//!
//!     let index = workflow.add_pointer(&step);
//!     let mut ctx = StepExecutionContext::new(&mut workflow, index, &step)?;
//!     let result = pipeline.run_step(&mut ctx, &Reserve).await?;
//!     assert_eq!(result.signal(), ResultSignal::Proceed);
//!
//!     workflow.complete(chrono::Utc::now());
//!     pipeline.run_post_complete(&mut workflow).await
//! }
//! ```

mod middleware;
mod pipeline;
mod policy;
mod registry;

// Re-export core types
pub use tsunagi_core::*;

pub use middleware::{
    LogCorrelationMiddleware, MetricsMiddleware, RetryMiddleware, StepMetricsSnapshot,
    TimeoutMiddleware, WorkflowSummaryMiddleware,
};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use policy::LogAndContinue;
pub use registry::MiddlewareRegistry;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        ErrorAction, ExecutionResult, LifecycleErrorPolicy, LogCorrelationMiddleware,
        MetricsMiddleware, MiddlewareFailure, Next, Pipeline, ResultSignal, RetryMiddleware,
        RetryPolicy, Step, StepDefinition, StepExecutionContext, StepFailure, StepMiddleware,
        StepName, TimeoutMiddleware, WorkflowError, WorkflowInstance, WorkflowMiddleware,
        WorkflowMiddlewarePhase, WorkflowNext, WorkflowStatus, WorkflowSummaryMiddleware,
    };
}
