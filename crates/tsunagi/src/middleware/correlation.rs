use async_trait::async_trait;
use tracing::{debug, info_span, warn, Instrument};
use tsunagi_core::{
    ExecutionResult, Next, ResultSignal, StepExecutionContext, StepMiddleware, WorkflowError,
};

/// Runs each step attempt inside a `step` span.
///
/// The span carries the workflow id, step id, step name and attempt number,
/// so everything logged further down the chain, including by the step body,
/// can be correlated to one attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCorrelationMiddleware;

#[async_trait]
impl StepMiddleware for LogCorrelationMiddleware {
    async fn handle(
        &self,
        ctx: &mut StepExecutionContext<'_>,
        next: Next<'_>,
    ) -> Result<ExecutionResult, WorkflowError> {
        let span = info_span!(
            "step",
            workflow_id = %ctx.workflow().id(),
            step_id = %ctx.step().id,
            step = %ctx.step().name,
            attempt = ctx.pointer().retry_count + 1
        );

        async move {
            debug!("starting attempt");
            let result = next.run(ctx).await;
            match &result {
                Ok(r) => match r.signal() {
                    ResultSignal::Proceed => debug!("attempt finished"),
                    ResultSignal::Sleep => debug!(after = ?r.proceed_after, "attempt sleeping"),
                    ResultSignal::Retry => debug!(after = ?r.proceed_after, "attempt will be retried"),
                    ResultSignal::Fail => warn!("attempt failed permanently"),
                },
                Err(e) => warn!("attempt raised: {}", e),
            }
            result
        }
        .instrument(span)
        .await
    }
}
