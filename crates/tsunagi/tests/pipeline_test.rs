use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tsunagi::prelude::*;
use tsunagi::{FailureKind, PointerStatus};

type Journal = Arc<Mutex<Vec<String>>>;

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

fn push(journal: &Journal, entry: impl Into<String>) {
    journal.lock().unwrap().push(entry.into());
}

// Step bodies

#[derive(Debug)]
struct Returns(&'static str, Journal);

#[async_trait]
impl Step for Returns {
    async fn execute(
        &self,
        _ctx: &mut StepExecutionContext<'_>,
    ) -> Result<ExecutionResult, WorkflowError> {
        push(&self.1, "body");
        Ok(ExecutionResult::outcome(self.0))
    }

    fn name(&self) -> StepName {
        StepName::new("Returns")
    }
}

#[derive(Debug)]
struct TimesOut;

#[async_trait]
impl Step for TimesOut {
    async fn execute(
        &self,
        ctx: &mut StepExecutionContext<'_>,
    ) -> Result<ExecutionResult, WorkflowError> {
        Err(WorkflowError::Timeout {
            step_name: ctx.step().name.clone(),
        })
    }

    fn name(&self) -> StepName {
        StepName::new("TimesOut")
    }
}

#[derive(Debug)]
struct Hangs;

#[async_trait]
impl Step for Hangs {
    async fn execute(
        &self,
        _ctx: &mut StepExecutionContext<'_>,
    ) -> Result<ExecutionResult, WorkflowError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ExecutionResult::next())
    }

    fn name(&self) -> StepName {
        StepName::new("Hangs")
    }
}

// Step middleware

struct Tag(&'static str, Journal);

#[async_trait]
impl StepMiddleware for Tag {
    async fn handle(
        &self,
        ctx: &mut StepExecutionContext<'_>,
        next: Next<'_>,
    ) -> Result<ExecutionResult, WorkflowError> {
        push(&self.1, format!("{}:before", self.0));
        let result = next.run(ctx).await;
        push(&self.1, format!("{}:after", self.0));
        result
    }
}

struct ShortCircuit(Journal);

#[async_trait]
impl StepMiddleware for ShortCircuit {
    async fn handle(
        &self,
        _ctx: &mut StepExecutionContext<'_>,
        _next: Next<'_>,
    ) -> Result<ExecutionResult, WorkflowError> {
        push(&self.0, "short-circuit");
        Ok(ExecutionResult::sleep(Duration::from_secs(42)))
    }
}

/// Catches timeouts and asks for a retry one second later.
struct CatchTimeout;

#[async_trait]
impl StepMiddleware for CatchTimeout {
    async fn handle(
        &self,
        ctx: &mut StepExecutionContext<'_>,
        next: Next<'_>,
    ) -> Result<ExecutionResult, WorkflowError> {
        let result = next.run(ctx).await;
        match result {
            Err(e @ WorkflowError::Timeout { .. }) => {
                ctx.pointer_mut().retry_count += 1;
                Ok(ExecutionResult::retry(
                    StepFailure::from(&e),
                    Duration::from_secs(1),
                ))
            }
            other => other,
        }
    }
}

// Workflow middleware

struct Lifecycle {
    label: &'static str,
    phase: WorkflowMiddlewarePhase,
    journal: Journal,
    fails: bool,
}

impl Lifecycle {
    fn new(label: &'static str, phase: WorkflowMiddlewarePhase, journal: &Journal) -> Self {
        Self {
            label,
            phase,
            journal: journal.clone(),
            fails: false,
        }
    }

    fn failing(mut self) -> Self {
        self.fails = true;
        self
    }
}

#[async_trait]
impl WorkflowMiddleware for Lifecycle {
    fn phase(&self) -> WorkflowMiddlewarePhase {
        self.phase
    }

    async fn handle(
        &self,
        workflow: &mut WorkflowInstance,
        next: WorkflowNext<'_>,
    ) -> Result<(), WorkflowError> {
        push(&self.journal, self.label);
        if self.fails {
            return Err(WorkflowError::middleware(self.label, "sink unavailable"));
        }
        next.run(workflow).await
    }

    fn name(&self) -> &'static str {
        self.label
    }
}

#[derive(Debug)]
struct TaskPayload {
    task_name: String,
}

struct DescribeTask;

#[async_trait]
impl WorkflowMiddleware for DescribeTask {
    fn phase(&self) -> WorkflowMiddlewarePhase {
        WorkflowMiddlewarePhase::PreStart
    }

    async fn handle(
        &self,
        workflow: &mut WorkflowInstance,
        next: WorkflowNext<'_>,
    ) -> Result<(), WorkflowError> {
        let task = workflow
            .data()
            .get::<TaskPayload>()
            .map(|payload| payload.task_name.clone())
            .ok_or_else(|| WorkflowError::middleware("describe", "missing task payload"))?;
        workflow.set_description(format!("Run task '{}'", task));
        next.run(workflow).await
    }
}

struct Reopen;

#[async_trait]
impl WorkflowMiddleware for Reopen {
    fn phase(&self) -> WorkflowMiddlewarePhase {
        WorkflowMiddlewarePhase::PostComplete
    }

    async fn handle(
        &self,
        workflow: &mut WorkflowInstance,
        next: WorkflowNext<'_>,
    ) -> Result<(), WorkflowError> {
        workflow.mark_runnable();
        next.run(workflow).await
    }
}

// Error policies

#[derive(Clone, Default)]
struct CountingPolicy {
    seen: Arc<Mutex<Vec<(&'static str, WorkflowError)>>>,
    action: ErrorAction,
}

#[async_trait]
impl LifecycleErrorPolicy for CountingPolicy {
    async fn handle(&self, failure: MiddlewareFailure<'_>) -> Result<ErrorAction, WorkflowError> {
        self.seen
            .lock()
            .unwrap()
            .push((failure.middleware, failure.error.clone()));
        Ok(self.action)
    }
}

struct BrokenPolicy;

#[async_trait]
impl LifecycleErrorPolicy for BrokenPolicy {
    async fn handle(&self, failure: MiddlewareFailure<'_>) -> Result<ErrorAction, WorkflowError> {
        Err(WorkflowError::ErrorPolicy(format!(
            "cannot report failure of {}",
            failure.middleware
        )))
    }
}

/// Fails only for failures of the named middleware.
#[derive(Clone)]
struct FailsFor {
    middleware: &'static str,
    seen: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl LifecycleErrorPolicy for FailsFor {
    async fn handle(&self, failure: MiddlewareFailure<'_>) -> Result<ErrorAction, WorkflowError> {
        self.seen.lock().unwrap().push(failure.middleware);
        if failure.middleware == self.middleware {
            return Err(WorkflowError::ErrorPolicy("sink down".into()));
        }
        Ok(ErrorAction::Continue)
    }
}

fn finished_workflow() -> WorkflowInstance {
    let mut workflow = WorkflowInstance::new("report", 1, ());
    workflow.mark_runnable();
    workflow.complete(chrono::Utc::now());
    workflow
}

#[tokio::test]
async fn test_no_middleware_body_outcome() {
    let journal = Journal::default();
    let pipeline = Pipeline::builder().build();
    let step = StepDefinition::new(0, "greet");
    let mut workflow = WorkflowInstance::new("hello", 1, ());
    let index = workflow.add_pointer(&step);

    let mut ctx = assert_ok!(StepExecutionContext::new(&mut workflow, index, &step));
    let result = assert_ok!(pipeline.run_step(&mut ctx, &Returns("ok", journal.clone())).await);

    assert_eq!(result.outcome, Some(serde_json::json!("ok")));
    let pointer = workflow.pointer(index).unwrap();
    assert_eq!(pointer.status, PointerStatus::Complete);
    assert_eq!(pointer.outcome, Some(serde_json::json!("ok")));
    assert_eq!(entries(&journal), vec!["body"]);
}

#[tokio::test]
async fn test_step_middleware_onion_order() {
    let journal = Journal::default();
    let pipeline = Pipeline::builder()
        .step_middleware(Tag("m1", journal.clone()))
        .step_middleware(Tag("m2", journal.clone()))
        .step_middleware(Tag("m3", journal.clone()))
        .build();
    let step = StepDefinition::new(0, "s");
    let mut workflow = WorkflowInstance::new("w", 1, ());
    let index = workflow.add_pointer(&step);
    let mut ctx = StepExecutionContext::new(&mut workflow, index, &step).unwrap();

    assert_ok!(pipeline.run_step(&mut ctx, &Returns("ok", journal.clone())).await);

    assert_eq!(
        entries(&journal),
        vec![
            "m1:before",
            "m2:before",
            "m3:before",
            "body",
            "m3:after",
            "m2:after",
            "m1:after"
        ]
    );
}

#[tokio::test]
async fn test_step_middleware_short_circuit() {
    let journal = Journal::default();
    let pipeline = Pipeline::builder()
        .step_middleware(Tag("m1", journal.clone()))
        .step_middleware(ShortCircuit(journal.clone()))
        .step_middleware(Tag("m3", journal.clone()))
        .build();
    let step = StepDefinition::new(0, "s");
    let mut workflow = WorkflowInstance::new("w", 1, ());
    let index = workflow.add_pointer(&step);
    let mut ctx = StepExecutionContext::new(&mut workflow, index, &step).unwrap();

    let result = assert_ok!(pipeline.run_step(&mut ctx, &Returns("ok", journal.clone())).await);

    assert_eq!(result, ExecutionResult::sleep(Duration::from_secs(42)));
    assert_eq!(
        entries(&journal),
        vec!["m1:before", "short-circuit", "m1:after"]
    );
    assert_eq!(ctx.pointer().status, PointerStatus::Sleeping);
}

#[tokio::test]
async fn test_middleware_catches_timeout_and_requests_retry() {
    let pipeline = Pipeline::builder().step_middleware(CatchTimeout).build();
    let step = StepDefinition::new(0, "fetch");
    let mut workflow = WorkflowInstance::new("w", 1, ());
    let index = workflow.add_pointer(&step);
    let mut ctx = StepExecutionContext::new(&mut workflow, index, &step).unwrap();

    let result = assert_ok!(pipeline.run_step(&mut ctx, &TimesOut).await);

    assert_eq!(result.signal(), ResultSignal::Retry);
    assert_eq!(result.failure.as_ref().map(|f| f.kind), Some(FailureKind::Timeout));
    let pointer = workflow.pointer(index).unwrap();
    assert_eq!(pointer.retry_count, 1);
    assert_eq!(pointer.status, PointerStatus::Sleeping);
    assert!(pointer.sleep_until > pointer.end_time);
}

#[tokio::test]
async fn test_retry_count_is_monotonic_across_attempts() {
    let pipeline = Pipeline::builder().step_middleware(CatchTimeout).build();
    let step = StepDefinition::new(0, "fetch");
    let mut workflow = WorkflowInstance::new("w", 1, ());
    let index = workflow.add_pointer(&step);

    for _ in 0..2 {
        let mut ctx = StepExecutionContext::new(&mut workflow, index, &step).unwrap();
        let result = assert_ok!(pipeline.run_step(&mut ctx, &TimesOut).await);
        assert!(result.is_retry());
    }

    assert_eq!(workflow.pointer(index).unwrap().retry_count, 2);
}

#[tokio::test]
async fn test_uncaught_step_error_marks_pointer_failed() {
    let pipeline = Pipeline::default();
    let step = StepDefinition::new(0, "fetch");
    let mut workflow = WorkflowInstance::new("w", 1, ());
    let index = workflow.add_pointer(&step);
    let mut ctx = StepExecutionContext::new(&mut workflow, index, &step).unwrap();

    let error = assert_err!(pipeline.run_step(&mut ctx, &TimesOut).await);

    assert!(matches!(error, WorkflowError::Timeout { .. }));
    let pointer = workflow.pointer(index).unwrap();
    assert_eq!(pointer.status, PointerStatus::Failed);
    assert!(pointer.end_time.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_builtin_retry_around_timeout() {
    let metrics = Arc::new(MetricsMiddleware::new());
    let pipeline = Pipeline::builder()
        .step_middleware(LogCorrelationMiddleware)
        .shared_step_middleware(metrics.clone())
        .step_middleware(RetryMiddleware::new())
        .step_middleware(TimeoutMiddleware::new())
        .build();
    let step = StepDefinition::new(0, "hang")
        .with_timeout(Some(Duration::from_millis(500)))
        .with_retry_policy(RetryPolicy::fixed(1, Duration::from_secs(2)));
    let mut workflow = WorkflowInstance::new("w", 1, ());
    let index = workflow.add_pointer(&step);

    let mut ctx = StepExecutionContext::new(&mut workflow, index, &step).unwrap();
    let first = assert_ok!(pipeline.run_step(&mut ctx, &Hangs).await);
    assert_eq!(first.signal(), ResultSignal::Retry);
    assert_eq!(first.proceed_after, Some(Duration::from_secs(2)));
    assert_eq!(ctx.pointer().retry_count, 1);

    let mut ctx = StepExecutionContext::new(&mut workflow, index, &step).unwrap();
    let second = assert_ok!(pipeline.run_step(&mut ctx, &Hangs).await);
    assert_eq!(second.signal(), ResultSignal::Fail);
    assert_eq!(ctx.pointer().retry_count, 1);
    assert_eq!(ctx.pointer().status, PointerStatus::Failed);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.invocations, 2);
    assert_eq!(snapshot.retries, 1);
    assert_eq!(snapshot.failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_without_retry_layer_fails_step() {
    let pipeline = Pipeline::builder()
        .step_middleware(TimeoutMiddleware::new())
        .build();
    let step = StepDefinition::new(0, "hang")
        .with_timeout(Some(Duration::from_millis(500)))
        .with_retry_policy(RetryPolicy::fixed(3, Duration::from_secs(2)));
    let mut workflow = WorkflowInstance::new("w", 1, ());
    let index = workflow.add_pointer(&step);
    let mut ctx = StepExecutionContext::new(&mut workflow, index, &step).unwrap();

    let result = assert_ok!(pipeline.run_step(&mut ctx, &Hangs).await);

    assert_eq!(result.signal(), ResultSignal::Fail);
    assert_eq!(result.failure.as_ref().map(|f| f.kind), Some(FailureKind::Timeout));
    let pointer = workflow.pointer(index).unwrap();
    assert_eq!(pointer.status, PointerStatus::Failed);
    assert_eq!(pointer.retry_count, 0);
    assert!(pointer.sleep_until.is_none());
}

#[tokio::test]
async fn test_pre_start_sets_description_from_payload() {
    let pipeline = Pipeline::builder().workflow_middleware(DescribeTask).build();
    let mut workflow = WorkflowInstance::new(
        "task-runner",
        1,
        TaskPayload {
            task_name: "X".into(),
        },
    );

    assert_ok!(pipeline.run_pre_start(&mut workflow).await);

    assert_eq!(workflow.description(), Some("Run task 'X'"));
    assert_eq!(workflow.status(), WorkflowStatus::Runnable);
}

#[tokio::test]
async fn test_pre_start_error_propagates_without_admission() {
    let journal = Journal::default();
    let pipeline = Pipeline::builder()
        .workflow_middleware(Lifecycle::new(
            "validate",
            WorkflowMiddlewarePhase::PreStart,
            &journal,
        ))
        .workflow_middleware(DescribeTask)
        .workflow_middleware(Lifecycle::new(
            "never",
            WorkflowMiddlewarePhase::PreStart,
            &journal,
        ))
        .build();
    // payload of the wrong type
    let mut workflow = WorkflowInstance::new("task-runner", 1, 7u8);

    let error = assert_err!(pipeline.run_pre_start(&mut workflow).await);

    assert_eq!(
        error,
        WorkflowError::middleware("describe", "missing task payload")
    );
    assert_eq!(workflow.status(), WorkflowStatus::Created);
    assert_eq!(workflow.description(), None);
    assert_eq!(entries(&journal), vec!["validate"]);
}

#[tokio::test]
async fn test_post_complete_failure_does_not_stop_chain() {
    let journal = Journal::default();
    let pipeline = Pipeline::builder()
        .workflow_middleware(
            Lifecycle::new("log", WorkflowMiddlewarePhase::PostComplete, &journal).failing(),
        )
        .workflow_middleware(Lifecycle::new(
            "publish",
            WorkflowMiddlewarePhase::PostComplete,
            &journal,
        ))
        .build();
    let mut workflow = finished_workflow();

    assert_ok!(pipeline.run_post_complete(&mut workflow).await);

    assert_eq!(entries(&journal), vec!["log", "publish"]);
    assert_eq!(workflow.status(), WorkflowStatus::Complete);
}

#[tokio::test]
async fn test_policy_invoked_once_per_failure() {
    let journal = Journal::default();
    let policy = CountingPolicy::default();
    let pipeline = Pipeline::builder()
        .workflow_middleware(Lifecycle::new(
            "first",
            WorkflowMiddlewarePhase::PostComplete,
            &journal,
        ))
        .workflow_middleware(
            Lifecycle::new("second", WorkflowMiddlewarePhase::PostComplete, &journal).failing(),
        )
        .workflow_middleware(Lifecycle::new(
            "third",
            WorkflowMiddlewarePhase::PostComplete,
            &journal,
        ))
        .error_policy(policy.clone())
        .build();
    let mut workflow = finished_workflow();

    assert_ok!(pipeline.run_post_complete(&mut workflow).await);

    assert_eq!(entries(&journal), vec!["first", "second", "third"]);
    assert_eq!(
        *policy.seen.lock().unwrap(),
        vec![(
            "second",
            WorkflowError::middleware("second", "sink unavailable")
        )]
    );
}

#[tokio::test]
async fn test_halt_policy_skips_downstream() {
    let journal = Journal::default();
    let policy = CountingPolicy {
        action: ErrorAction::Halt,
        ..CountingPolicy::default()
    };
    let pipeline = Pipeline::builder()
        .workflow_middleware(
            Lifecycle::new("first", WorkflowMiddlewarePhase::PostComplete, &journal).failing(),
        )
        .workflow_middleware(Lifecycle::new(
            "second",
            WorkflowMiddlewarePhase::PostComplete,
            &journal,
        ))
        .error_policy(policy.clone())
        .build();
    let mut workflow = finished_workflow();

    assert_ok!(pipeline.run_post_complete(&mut workflow).await);

    assert_eq!(entries(&journal), vec!["first"]);
    assert_eq!(policy.seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_failing_policy_propagates() {
    let journal = Journal::default();
    let pipeline = Pipeline::builder()
        .workflow_middleware(
            Lifecycle::new("audit", WorkflowMiddlewarePhase::PostComplete, &journal).failing(),
        )
        .error_policy(BrokenPolicy)
        .build();
    let mut workflow = finished_workflow();

    let error = assert_err!(pipeline.run_post_complete(&mut workflow).await);

    assert_eq!(
        error,
        WorkflowError::ErrorPolicy("cannot report failure of audit".into())
    );
}

#[tokio::test]
async fn test_failing_policy_propagates_through_outer_middleware() {
    let journal = Journal::default();
    let policy = FailsFor {
        middleware: "audit",
        seen: Arc::default(),
    };
    let pipeline = Pipeline::builder()
        .workflow_middleware(WorkflowSummaryMiddleware)
        .workflow_middleware(
            Lifecycle::new("audit", WorkflowMiddlewarePhase::PostComplete, &journal).failing(),
        )
        .error_policy(policy.clone())
        .build();
    let mut workflow = finished_workflow();

    let error = assert_err!(pipeline.run_post_complete(&mut workflow).await);

    assert_eq!(error, WorkflowError::ErrorPolicy("sink down".into()));
    assert_eq!(*policy.seen.lock().unwrap(), vec!["audit"]);
    assert_eq!(workflow.status(), WorkflowStatus::Complete);
}

#[tokio::test]
async fn test_post_complete_restores_terminal_state() {
    let pipeline = Pipeline::builder()
        .workflow_middleware(Reopen)
        .workflow_middleware(WorkflowSummaryMiddleware)
        .build();
    let mut workflow = WorkflowInstance::new("w", 1, ());
    workflow.mark_runnable();
    let finished_at = chrono::Utc::now();
    workflow.terminate(finished_at);

    assert_ok!(pipeline.run_post_complete(&mut workflow).await);

    assert_eq!(workflow.status(), WorkflowStatus::Terminated);
    assert_eq!(workflow.complete_time(), Some(finished_at));
}

#[tokio::test]
async fn test_registration_after_build_is_observed() {
    let journal = Journal::default();
    let mut pipeline = Pipeline::builder().build();
    let step = StepDefinition::new(0, "s");
    let mut workflow = WorkflowInstance::new("w", 1, ());
    let index = workflow.add_pointer(&step);

    pipeline.register_step_middleware(Arc::new(Tag("late", journal.clone())));
    let mut ctx = StepExecutionContext::new(&mut workflow, index, &step).unwrap();
    assert_ok!(pipeline.run_step(&mut ctx, &Returns("ok", journal.clone())).await);

    assert_eq!(entries(&journal), vec!["late:before", "body", "late:after"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_instances_share_pipeline() {
    let metrics = Arc::new(MetricsMiddleware::new());
    let pipeline = Arc::new(
        Pipeline::builder()
            .shared_step_middleware(metrics.clone())
            .step_middleware(CatchTimeout)
            .workflow_middleware(DescribeTask)
            .build(),
    );
    let step = Arc::new(StepDefinition::new(0, "fetch"));

    let mut handles = Vec::new();
    for i in 0..16 {
        let pipeline = pipeline.clone();
        let step = step.clone();
        handles.push(tokio::spawn(async move {
            let mut workflow = WorkflowInstance::new(
                "task-runner",
                1,
                TaskPayload {
                    task_name: format!("task-{}", i),
                },
            );
            pipeline.run_pre_start(&mut workflow).await?;
            let index = workflow.add_pointer(&step);
            let mut ctx = StepExecutionContext::new(&mut workflow, index, &step)?;
            pipeline.run_step(&mut ctx, &TimesOut).await?;
            workflow.complete(chrono::Utc::now());
            pipeline.run_post_complete(&mut workflow).await?;
            Ok::<_, WorkflowError>(workflow)
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let workflow = assert_ok!(handle.await.unwrap());
        assert_eq!(workflow.description(), Some(format!("Run task 'task-{}'", i).as_str()));
        assert_eq!(workflow.execution_pointers()[0].retry_count, 1);
    }
    assert_eq!(metrics.snapshot().invocations, 16);
    assert_eq!(metrics.snapshot().retries, 16);
}
