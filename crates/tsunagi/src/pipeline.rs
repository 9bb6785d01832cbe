//! The coordinator the scheduler calls around workflow and step execution.

use crate::registry::MiddlewareRegistry;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tsunagi_core::{
    ExecutionResult, LifecycleErrorPolicy, Next, Step, StepExecutionContext, StepMiddleware,
    WorkflowError, WorkflowInstance, WorkflowMiddleware, WorkflowMiddlewarePhase, WorkflowNext,
    WorkflowStatus,
};

/// Runs the registered middleware chains.
///
/// Chains are assembled on every call from the registry, so registration
/// performed between calls is always observed. After startup a pipeline is
/// usually shared read-only as `Arc<Pipeline>` across worker tasks.
#[derive(Debug, Default)]
pub struct Pipeline {
    registry: MiddlewareRegistry,
}

impl Pipeline {
    /// Creates a pipeline over an existing registry.
    pub fn new(registry: MiddlewareRegistry) -> Self {
        Self { registry }
    }

    /// Creates a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Returns the registry.
    pub fn registry(&self) -> &MiddlewareRegistry {
        &self.registry
    }

    /// Appends a step middleware.
    pub fn register_step_middleware(&mut self, middleware: Arc<dyn StepMiddleware>) {
        self.registry.register_step_middleware(middleware);
    }

    /// Appends a workflow middleware to the chain of its declared phase.
    pub fn register_workflow_middleware(&mut self, middleware: Arc<dyn WorkflowMiddleware>) {
        self.registry.register_workflow_middleware(middleware);
    }

    /// Runs the pre-start chain for a freshly constructed instance.
    ///
    /// On success the instance is marked `Runnable`. On failure the error
    /// returned by the chain is passed back unchanged and the instance stays
    /// `Created`, so the caller must not admit it.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::InvalidStatus`] if the instance is not
    /// `Created`, or whatever error a pre-start middleware raised.
    pub async fn run_pre_start(&self, workflow: &mut WorkflowInstance) -> Result<(), WorkflowError> {
        if workflow.status() != WorkflowStatus::Created {
            return Err(WorkflowError::InvalidStatus {
                workflow_id: workflow.id(),
                expected: "created",
                actual: workflow.status(),
            });
        }

        let chain = self
            .registry
            .workflow_middleware(WorkflowMiddlewarePhase::PreStart);
        debug!(
            "Running {} pre-start middleware for workflow {}",
            chain.len(),
            workflow.id()
        );

        match WorkflowNext::propagating(chain).run(workflow).await {
            Ok(()) => {
                workflow.mark_runnable();
                info!("Workflow {} admitted", workflow.id());
                Ok(())
            }
            Err(e) => {
                warn!("Pre-start middleware rejected workflow {}: {}", workflow.id(), e);
                Err(e)
            }
        }
    }

    /// Runs one attempt of a step through the step chain.
    ///
    /// Stamps `start_time` before the chain and `end_time` after it, whether
    /// or not the body ran, then records the outcome on the pointer. An
    /// error escaping the outermost middleware marks the pointer `Failed`
    /// and is returned to the scheduler.
    pub async fn run_step(
        &self,
        ctx: &mut StepExecutionContext<'_>,
        body: &dyn Step,
    ) -> Result<ExecutionResult, WorkflowError> {
        let chain = Next::new(self.registry.step_middleware(), body);

        ctx.pointer_mut().begin_attempt(Utc::now());
        let outcome = chain.run(ctx).await;
        let finished = Utc::now();

        let pointer = ctx.pointer_mut();
        match &outcome {
            Ok(result) => {
                pointer.record_result(result, finished);
                debug!(
                    "Step '{}' attempt finished as {}",
                    pointer.step_name, pointer.status
                );
            }
            Err(e) => {
                pointer.record_error(finished);
                warn!("Step '{}' failed: {}", pointer.step_name, e);
            }
        }
        outcome
    }

    /// Runs the post-complete chain for a terminal instance.
    ///
    /// Errors raised by individual middleware are handed to the error policy
    /// and never returned. The recorded terminal status and completion time
    /// are restored if a middleware changed them.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::InvalidStatus`] if the instance is not
    /// terminal, or the error of a failing error policy.
    pub async fn run_post_complete(&self, workflow: &mut WorkflowInstance) -> Result<(), WorkflowError> {
        let status = workflow.status();
        if !status.is_terminal() {
            return Err(WorkflowError::InvalidStatus {
                workflow_id: workflow.id(),
                expected: "complete or terminated",
                actual: status,
            });
        }
        let complete_time = workflow.complete_time();

        let chain = self
            .registry
            .workflow_middleware(WorkflowMiddlewarePhase::PostComplete);
        debug!(
            "Running {} post-complete middleware for workflow {}",
            chain.len(),
            workflow.id()
        );

        let policy: &dyn LifecycleErrorPolicy = self.registry.error_policy();
        let result = WorkflowNext::absorbing(chain, policy).run(workflow).await;

        if workflow.status() != status || workflow.complete_time() != complete_time {
            warn!(
                "Post-complete middleware altered terminal state of workflow {}, restoring",
                workflow.id()
            );
            workflow.restore_terminal(status, complete_time);
        }
        result
    }
}

/// Builder for constructing [`Pipeline`] instances.
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    registry: MiddlewareRegistry,
}

impl PipelineBuilder {
    /// Creates a builder with no middleware and the default error policy.
    pub fn new() -> Self {
        Self {
            registry: MiddlewareRegistry::new(),
        }
    }

    /// Appends a step middleware.
    pub fn step_middleware<M: StepMiddleware + 'static>(self, middleware: M) -> Self {
        self.shared_step_middleware(Arc::new(middleware))
    }

    /// Appends a step middleware the caller keeps a handle to.
    pub fn shared_step_middleware(mut self, middleware: Arc<dyn StepMiddleware>) -> Self {
        self.registry.register_step_middleware(middleware);
        self
    }

    /// Appends a workflow middleware to the chain of its declared phase.
    pub fn workflow_middleware<M: WorkflowMiddleware + 'static>(mut self, middleware: M) -> Self {
        self.registry.register_workflow_middleware(Arc::new(middleware));
        self
    }

    /// Replaces the lifecycle error policy.
    pub fn error_policy<P: LifecycleErrorPolicy + 'static>(mut self, policy: P) -> Self {
        self.registry.set_error_policy(Arc::new(policy));
        self
    }

    /// Builds the pipeline.
    pub fn build(self) -> Pipeline {
        Pipeline::new(self.registry)
    }
}
