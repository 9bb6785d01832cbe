use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};
use tsunagi_core::{
    ExecutionResult, FailureKind, Next, RetryPolicy, StepExecutionContext, StepFailure,
    StepMiddleware, WorkflowError,
};

/// Turns retryable failures into retry directives.
///
/// Catches errors for which [`WorkflowError::is_retryable`] holds, and
/// results without a `proceed_after` carrying a retryable failure or a
/// [`FailureKind::Timeout`] failure such as the one produced by
/// [`TimeoutMiddleware`](super::TimeoutMiddleware). While the
/// pointer's `retry_count` is below the policy's `max_retries` the counter
/// is incremented and [`ExecutionResult::retry`] is returned with the
/// policy's delay. The middleware never sleeps; scheduling the next attempt
/// is the scheduler's job.
///
/// Once retries are exhausted, errors are passed through unchanged and
/// failures are marked permanent.
#[derive(Debug, Clone, Default)]
pub struct RetryMiddleware {
    policy: Option<RetryPolicy>,
}

impl RetryMiddleware {
    /// Uses the retry policy of each step's definition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `policy` for every step, ignoring the step definitions.
    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            policy: Some(policy),
        }
    }
}

#[async_trait]
impl StepMiddleware for RetryMiddleware {
    async fn handle(
        &self,
        ctx: &mut StepExecutionContext<'_>,
        next: Next<'_>,
    ) -> Result<ExecutionResult, WorkflowError> {
        let result = next.run(ctx).await;

        let failure = match &result {
            Err(e) if e.is_retryable() => StepFailure::from(e),
            Ok(ExecutionResult {
                failure: Some(failure),
                proceed_after: None,
                ..
            }) if failure.retryable || failure.kind == FailureKind::Timeout => failure.clone(),
            _ => return result,
        };

        let policy = self
            .policy
            .clone()
            .unwrap_or_else(|| ctx.step().config.retry_policy.clone());
        let max_retries = policy.max_retries();
        let attempt = ctx.pointer().retry_count;

        if attempt < max_retries {
            let delay = policy.delay_for_attempt(attempt).unwrap_or(Duration::ZERO);
            ctx.pointer_mut().retry_count = attempt + 1;
            info!(
                "Step '{}' {}, retrying ({}/{}) in {:?}",
                ctx.step().name,
                failure.message,
                attempt + 1,
                max_retries,
                delay
            );
            return Ok(ExecutionResult::retry(failure, delay));
        }

        warn!(
            "Step '{}' failed after {} retries: {}",
            ctx.step().name,
            attempt,
            failure.message
        );
        result.map(|mut exhausted| {
            if let Some(failure) = exhausted.failure.as_mut() {
                failure.retryable = false;
            }
            exhausted
        })
    }
}
