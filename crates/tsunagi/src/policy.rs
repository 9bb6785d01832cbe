//! Built-in lifecycle error policies.

use async_trait::async_trait;
use tracing::error;
use tsunagi_core::{ErrorAction, LifecycleErrorPolicy, MiddlewareFailure, WorkflowError};

/// Default policy: log the failure and let the chain continue.
///
/// The workflow is already terminal when post-complete middleware runs, so
/// one failing observer never prevents the others from running.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAndContinue;

#[async_trait]
impl LifecycleErrorPolicy for LogAndContinue {
    async fn handle(&self, failure: MiddlewareFailure<'_>) -> Result<ErrorAction, WorkflowError> {
        error!(
            workflow_id = %failure.workflow.id(),
            middleware = failure.middleware,
            "Error executing post-complete middleware: {}",
            failure.error
        );
        Ok(ErrorAction::Continue)
    }
}
