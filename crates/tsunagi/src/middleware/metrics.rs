use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tsunagi_core::{
    ExecutionResult, Next, ResultSignal, StepExecutionContext, StepMiddleware, WorkflowError,
};

/// Counts step attempts by how they ended.
///
/// Register it through [`PipelineBuilder::shared_step_middleware`] to keep a
/// handle for reading [`snapshot`](Self::snapshot):
///
/// ```
/// use std::sync::Arc;
/// use tsunagi::{MetricsMiddleware, Pipeline};
///
/// let metrics = Arc::new(MetricsMiddleware::new());
/// let pipeline = Pipeline::builder()
///     .shared_step_middleware(metrics.clone())
///     .build();
/// assert_eq!(metrics.snapshot().invocations, 0);
/// # drop(pipeline);
/// ```
///
/// [`PipelineBuilder::shared_step_middleware`]: crate::PipelineBuilder::shared_step_middleware
#[derive(Debug, Default)]
pub struct MetricsMiddleware {
    invocations: AtomicU64,
    completed: AtomicU64,
    sleeping: AtomicU64,
    retries: AtomicU64,
    failed: AtomicU64,
    errors: AtomicU64,
    total_duration_micros: AtomicU64,
}

/// Point-in-time copy of the counters of a [`MetricsMiddleware`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepMetricsSnapshot {
    /// Attempts that entered the middleware.
    pub invocations: u64,
    /// Attempts that finished the step.
    pub completed: u64,
    /// Attempts that asked to be invoked again later.
    pub sleeping: u64,
    /// Attempts that ended with a retry directive.
    pub retries: u64,
    /// Attempts that ended with a permanent failure.
    pub failed: u64,
    /// Attempts whose chain raised an error.
    pub errors: u64,
    /// Time spent in the rest of the chain, summed over all attempts.
    pub total_duration: Duration,
}

impl StepMetricsSnapshot {
    /// Mean time per attempt, or zero before the first attempt.
    pub fn average_duration(&self) -> Duration {
        u32::try_from(self.invocations)
            .ok()
            .filter(|n| *n > 0)
            .map(|n| self.total_duration / n)
            .unwrap_or_default()
    }
}

impl MetricsMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads all counters.
    pub fn snapshot(&self) -> StepMetricsSnapshot {
        StepMetricsSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            sleeping: self.sleeping.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            total_duration: Duration::from_micros(
                self.total_duration_micros.load(Ordering::Relaxed),
            ),
        }
    }

    fn record(&self, result: &Result<ExecutionResult, WorkflowError>, elapsed: Duration) {
        let counter = match result {
            Ok(r) => match r.signal() {
                ResultSignal::Proceed => &self.completed,
                ResultSignal::Sleep => &self.sleeping,
                ResultSignal::Retry => &self.retries,
                ResultSignal::Fail => &self.failed,
            },
            Err(_) => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_duration_micros
            .fetch_add(micros, Ordering::Relaxed);
    }
}

#[async_trait]
impl StepMiddleware for MetricsMiddleware {
    async fn handle(
        &self,
        ctx: &mut StepExecutionContext<'_>,
        next: Next<'_>,
    ) -> Result<ExecutionResult, WorkflowError> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let result = next.run(ctx).await;
        self.record(&result, started.elapsed());
        result
    }
}
