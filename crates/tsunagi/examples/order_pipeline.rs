//! Order fulfilment driven through the middleware pipeline.
//!
//! A minimal scheduler loop runs two steps of an order workflow. The
//! payment step fails transiently twice; the retry middleware turns those
//! failures into retry directives and the loop sleeps before the next
//! attempt. A post-complete audit middleware fails and is absorbed by the
//! default error policy.
//!
//! ```sh
//! RUST_LOG=debug cargo run --example order_pipeline
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tsunagi::prelude::*;

#[derive(Debug)]
struct Order {
    id: String,
    amount_cents: u64,
}

#[derive(Debug)]
struct ReserveStock;

#[async_trait]
impl Step for ReserveStock {
    async fn execute(
        &self,
        ctx: &mut StepExecutionContext<'_>,
    ) -> Result<ExecutionResult, WorkflowError> {
        let order_id = ctx
            .workflow()
            .data()
            .get::<Order>()
            .map(|order| order.id.clone())
            .unwrap_or_default();
        println!("Reserving stock for order {}", order_id);
        ctx.pointer_mut().persisted_outputs = Some(serde_json::json!({ "warehouse": "tokyo-2" }));
        Ok(ExecutionResult::outcome("reserved"))
    }

    fn name(&self) -> StepName {
        StepName::new("ReserveStock")
    }
}

/// Fails until the third attempt.
#[derive(Debug, Default)]
struct ChargeCard {
    attempts: AtomicU32,
}

#[async_trait]
impl Step for ChargeCard {
    async fn execute(
        &self,
        ctx: &mut StepExecutionContext<'_>,
    ) -> Result<ExecutionResult, WorkflowError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt < 3 {
            return Err(WorkflowError::Transient {
                step_name: ctx.step().name.clone(),
                details: format!("payment gateway unavailable (attempt {})", attempt),
            });
        }
        let amount = ctx
            .workflow()
            .data()
            .get::<Order>()
            .map(|order| order.amount_cents)
            .unwrap_or_default();
        Ok(ExecutionResult::outcome(amount))
    }

    fn name(&self) -> StepName {
        StepName::new("ChargeCard")
    }
}

struct DescribeOrder;

#[async_trait]
impl WorkflowMiddleware for DescribeOrder {
    fn phase(&self) -> WorkflowMiddlewarePhase {
        WorkflowMiddlewarePhase::PreStart
    }

    async fn handle(
        &self,
        workflow: &mut WorkflowInstance,
        next: WorkflowNext<'_>,
    ) -> Result<(), WorkflowError> {
        let description = workflow
            .data()
            .get::<Order>()
            .map(|order| format!("Fulfil order '{}'", order.id))
            .ok_or_else(|| WorkflowError::middleware("describe_order", "payload is not an order"))?;
        workflow.set_description(description);
        next.run(workflow).await
    }
}

struct Audit;

#[async_trait]
impl WorkflowMiddleware for Audit {
    fn phase(&self) -> WorkflowMiddlewarePhase {
        WorkflowMiddlewarePhase::PostComplete
    }

    async fn handle(
        &self,
        _workflow: &mut WorkflowInstance,
        _next: WorkflowNext<'_>,
    ) -> Result<(), WorkflowError> {
        Err(WorkflowError::middleware("audit", "audit sink is offline"))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics = Arc::new(MetricsMiddleware::new());
    let pipeline = Pipeline::builder()
        .step_middleware(LogCorrelationMiddleware)
        .shared_step_middleware(metrics.clone())
        .step_middleware(RetryMiddleware::new())
        .step_middleware(TimeoutMiddleware::new())
        .workflow_middleware(DescribeOrder)
        .workflow_middleware(Audit)
        .workflow_middleware(WorkflowSummaryMiddleware)
        .build();

    let steps: Vec<(StepDefinition, Box<dyn Step>)> = vec![
        (StepDefinition::new(0, "reserve"), Box::new(ReserveStock)),
        (
            StepDefinition::new(1, "charge")
                .with_timeout(Some(Duration::from_secs(5)))
                .with_retry_policy(RetryPolicy::exponential(3, Duration::from_millis(50))),
            Box::new(ChargeCard::default()),
        ),
    ];

    let mut workflow = WorkflowInstance::new(
        "order-fulfilment",
        1,
        Order {
            id: "A-1001".into(),
            amount_cents: 4_200,
        },
    );
    pipeline.run_pre_start(&mut workflow).await?;
    println!(
        "Admitted: {}",
        workflow.description().unwrap_or("(no description)")
    );

    for (definition, body) in &steps {
        let index = workflow.add_pointer(definition);
        loop {
            let mut ctx = StepExecutionContext::new(&mut workflow, index, definition)?;
            let result = pipeline.run_step(&mut ctx, body.as_ref()).await?;
            match result.signal() {
                ResultSignal::Retry | ResultSignal::Sleep => {
                    tokio::time::sleep(result.proceed_after.unwrap_or_default()).await;
                }
                ResultSignal::Proceed => break,
                ResultSignal::Fail => {
                    workflow.terminate(chrono::Utc::now());
                    break;
                }
            }
        }
        if workflow.is_terminal() {
            break;
        }
    }
    if !workflow.is_terminal() {
        workflow.complete(chrono::Utc::now());
    }

    pipeline.run_post_complete(&mut workflow).await?;

    println!("Workflow finished as {}", workflow.status());
    println!("Step metrics: {:?}", metrics.snapshot());
    Ok(())
}
