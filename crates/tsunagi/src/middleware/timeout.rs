use async_trait::async_trait;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;
use tsunagi_core::{
    ExecutionResult, FailureKind, Next, StepExecutionContext, StepFailure, StepMiddleware,
    WorkflowError,
};

/// Bounds the time the rest of the chain may take.
///
/// When the limit expires the downstream future is dropped and a result
/// carrying a [`FailureKind::Timeout`] failure is returned. The failure is
/// permanent, so on its own an expired attempt fails the step. An outer
/// [`RetryMiddleware`](super::RetryMiddleware) turns it into a retry while
/// the step's retry budget lasts.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutMiddleware {
    limit: Option<Duration>,
}

impl TimeoutMiddleware {
    /// Uses the timeout of each step's definition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `limit` for every step.
    pub fn fixed(limit: Duration) -> Self {
        Self { limit: Some(limit) }
    }
}

#[async_trait]
impl StepMiddleware for TimeoutMiddleware {
    async fn handle(
        &self,
        ctx: &mut StepExecutionContext<'_>,
        next: Next<'_>,
    ) -> Result<ExecutionResult, WorkflowError> {
        let Some(limit) = self.limit.or(ctx.step().config.timeout) else {
            return next.run(ctx).await;
        };

        let outcome = timeout(limit, next.run(ctx)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!("Step '{}' timed out after {:?}", ctx.step().name, limit);
                let error = WorkflowError::Timeout {
                    step_name: ctx.step().name.clone(),
                };
                Ok(ExecutionResult::failed(StepFailure::permanent(
                    FailureKind::Timeout,
                    error.to_string(),
                )))
            }
        }
    }
}
