//! Ordered middleware registration.

use crate::policy::LogAndContinue;
use std::fmt;
use std::sync::Arc;
use tsunagi_core::{
    LifecycleErrorPolicy, StepMiddleware, WorkflowMiddleware, WorkflowMiddlewarePhase,
};

/// The registered middleware of a pipeline and its lifecycle error policy.
///
/// Registration appends; the order of each list is the nesting order of
/// its chain. Registries are populated during startup through `&mut`
/// access and only read afterwards.
pub struct MiddlewareRegistry {
    step: Vec<Arc<dyn StepMiddleware>>,
    pre_start: Vec<Arc<dyn WorkflowMiddleware>>,
    post_complete: Vec<Arc<dyn WorkflowMiddleware>>,
    error_policy: Arc<dyn LifecycleErrorPolicy>,
}

impl Default for MiddlewareRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MiddlewareRegistry {
    /// Creates an empty registry using the [`LogAndContinue`] error policy.
    pub fn new() -> Self {
        Self {
            step: Vec::new(),
            pre_start: Vec::new(),
            post_complete: Vec::new(),
            error_policy: Arc::new(LogAndContinue),
        }
    }

    /// Appends a step middleware.
    pub fn register_step_middleware(&mut self, middleware: Arc<dyn StepMiddleware>) {
        self.step.push(middleware);
    }

    /// Appends a workflow middleware to the chain of the phase it declares.
    pub fn register_workflow_middleware(&mut self, middleware: Arc<dyn WorkflowMiddleware>) {
        match middleware.phase() {
            WorkflowMiddlewarePhase::PreStart => self.pre_start.push(middleware),
            WorkflowMiddlewarePhase::PostComplete => self.post_complete.push(middleware),
        }
    }

    /// Replaces the lifecycle error policy.
    pub fn set_error_policy(&mut self, policy: Arc<dyn LifecycleErrorPolicy>) {
        self.error_policy = policy;
    }

    /// Step middleware in registration order.
    pub fn step_middleware(&self) -> &[Arc<dyn StepMiddleware>] {
        &self.step
    }

    /// Workflow middleware of `phase` in registration order.
    pub fn workflow_middleware(&self, phase: WorkflowMiddlewarePhase) -> &[Arc<dyn WorkflowMiddleware>] {
        match phase {
            WorkflowMiddlewarePhase::PreStart => &self.pre_start,
            WorkflowMiddlewarePhase::PostComplete => &self.post_complete,
        }
    }

    /// The active lifecycle error policy.
    pub fn error_policy(&self) -> &dyn LifecycleErrorPolicy {
        self.error_policy.as_ref()
    }
}

impl fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareRegistry")
            .field("step", &self.step.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field(
                "pre_start",
                &self.pre_start.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field(
                "post_complete",
                &self.post_complete.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
