use async_trait::async_trait;
use tracing::info;
use tsunagi_core::{
    PointerStatus, WorkflowError, WorkflowInstance, WorkflowMiddleware, WorkflowMiddlewarePhase,
    WorkflowNext,
};

/// Logs one line per finished workflow: status, run time, step count and
/// how many retries it took.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowSummaryMiddleware;

#[async_trait]
impl WorkflowMiddleware for WorkflowSummaryMiddleware {
    fn phase(&self) -> WorkflowMiddlewarePhase {
        WorkflowMiddlewarePhase::PostComplete
    }

    async fn handle(
        &self,
        workflow: &mut WorkflowInstance,
        next: WorkflowNext<'_>,
    ) -> Result<(), WorkflowError> {
        next.run(workflow).await?;

        let pointers = workflow.execution_pointers();
        let failed = pointers
            .iter()
            .filter(|p| p.status == PointerStatus::Failed)
            .count();
        let retries: u32 = pointers.iter().map(|p| p.retry_count).sum();
        let duration = workflow
            .complete_time()
            .map(|end| end - workflow.create_time())
            .unwrap_or_else(chrono::Duration::zero);

        info!(
            workflow_id = %workflow.id(),
            definition = workflow.definition_id(),
            "Workflow {} in {}ms: {} steps, {} failed, {} retries",
            workflow.status(),
            duration.num_milliseconds(),
            pointers.len(),
            failed,
            retries
        );
        Ok(())
    }
}
