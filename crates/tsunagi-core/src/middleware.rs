//! Middleware traits and the continuations that nest them into chains.
//!
//! A chain is never materialized as a data structure. Each continuation
//! holds the slice of middleware that still has to run; awaiting it hands
//! control to the head of that slice with a continuation over the tail.
//! The innermost continuation runs the step body, or does nothing for the
//! lifecycle chains.

use crate::context::StepExecutionContext;
use crate::error::WorkflowError;
use crate::instance::WorkflowInstance;
use crate::result::ExecutionResult;
use crate::step::Step;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

fn short_type_name<T: ?Sized>() -> &'static str {
    let full_name = std::any::type_name::<T>();
    // Generic arguments are dropped: `a::Wrapper<b::Inner>` is `Wrapper`.
    let path = full_name.split('<').next().unwrap_or(full_name);
    path.rsplit("::").next().unwrap_or(path)
}

/// Interceptor around a single step attempt.
///
/// # Examples
///
/// ```
/// use tsunagi_core::{ExecutionResult, Next, StepExecutionContext, StepMiddleware, WorkflowError};
/// use async_trait::async_trait;
///
/// /// Skips every step whose name starts with `skip_`.
/// struct SkipMarked;
///
/// #[async_trait]
/// impl StepMiddleware for SkipMarked {
///     async fn handle(
///         &self,
///         ctx: &mut StepExecutionContext<'_>,
///         next: Next<'_>,
///     ) -> Result<ExecutionResult, WorkflowError> {
///         if ctx.step().name.as_str().starts_with("skip_") {
///             return Ok(ExecutionResult::next());
///         }
///         next.run(ctx).await
///     }
/// }
/// ```
#[async_trait]
pub trait StepMiddleware: Send + Sync {
    /// Handles one attempt.
    ///
    /// Call `next.run(ctx)` to continue down the chain. Returning without
    /// calling it short-circuits: neither the body nor any later middleware
    /// runs, and the returned result becomes the chain's result.
    async fn handle(
        &self,
        ctx: &mut StepExecutionContext<'_>,
        next: Next<'_>,
    ) -> Result<ExecutionResult, WorkflowError>;

    /// Name used in logs. Defaults to the type name without its module path
    /// or generic arguments.
    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }
}

/// Continuation of a step middleware chain.
///
/// Consumed by [`run`](Self::run), so a middleware can invoke the rest of
/// the chain at most once per attempt.
pub struct Next<'a> {
    middleware: &'a [Arc<dyn StepMiddleware>],
    body: &'a dyn Step,
}

impl<'a> Next<'a> {
    /// Creates the outermost continuation over `middleware` and `body`.
    pub fn new(middleware: &'a [Arc<dyn StepMiddleware>], body: &'a dyn Step) -> Self {
        Self { middleware, body }
    }

    /// The step body at the bottom of the chain.
    pub fn body(&self) -> &'a dyn Step {
        self.body
    }

    /// Number of middleware still ahead of the body.
    pub fn remaining(&self) -> usize {
        self.middleware.len()
    }

    /// Runs the remainder of the chain and then the body.
    pub fn run<'b>(
        self,
        ctx: &'b mut StepExecutionContext<'_>,
    ) -> BoxFuture<'b, Result<ExecutionResult, WorkflowError>>
    where
        'a: 'b,
    {
        match self.middleware.split_first() {
            Some((current, rest)) => current.handle(
                ctx,
                Next {
                    middleware: rest,
                    body: self.body,
                },
            ),
            None => self.body.execute(ctx),
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field(
                "middleware",
                &self.middleware.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("body", &self.body.name())
            .finish()
    }
}

/// The lifecycle moment a [`WorkflowMiddleware`] participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowMiddlewarePhase {
    /// Before the instance is admitted. Failures abort the start.
    PreStart,
    /// After the instance reached a terminal status. Failures are absorbed.
    PostComplete,
}

impl fmt::Display for WorkflowMiddlewarePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowMiddlewarePhase::PreStart => write!(f, "pre_start"),
            WorkflowMiddlewarePhase::PostComplete => write!(f, "post_complete"),
        }
    }
}

/// Interceptor around the start or completion of a workflow instance.
///
/// Pre-start middleware may change the payload and description.
/// Post-complete middleware should treat the instance as read-only.
///
/// # Examples
///
/// ```
/// use tsunagi_core::{WorkflowError, WorkflowInstance, WorkflowMiddleware, WorkflowMiddlewarePhase, WorkflowNext};
/// use async_trait::async_trait;
///
/// struct Describe;
///
/// #[async_trait]
/// impl WorkflowMiddleware for Describe {
///     fn phase(&self) -> WorkflowMiddlewarePhase {
///         WorkflowMiddlewarePhase::PreStart
///     }
///
///     async fn handle(
///         &self,
///         workflow: &mut WorkflowInstance,
///         next: WorkflowNext<'_>,
///     ) -> Result<(), WorkflowError> {
///         let label = format!("{} v{}", workflow.definition_id(), workflow.version());
///         workflow.set_description(label);
///         next.run(workflow).await
///     }
/// }
/// ```
#[async_trait]
pub trait WorkflowMiddleware: Send + Sync {
    /// The single phase this middleware runs in.
    fn phase(&self) -> WorkflowMiddlewarePhase;

    /// Handles the lifecycle event. Call `next.run(workflow)` to continue.
    async fn handle(
        &self,
        workflow: &mut WorkflowInstance,
        next: WorkflowNext<'_>,
    ) -> Result<(), WorkflowError>;

    /// Name used in logs and handed to the error policy.
    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }
}

/// What the lifecycle chain does after a post-complete middleware failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorAction {
    /// Run the remaining middleware as if the failed one had called `next`.
    #[default]
    Continue,
    /// Skip the middleware downstream of the failed one.
    Halt,
}

/// A post-complete middleware failure, as seen by the error policy.
#[derive(Debug)]
pub struct MiddlewareFailure<'a> {
    /// Name of the middleware whose frame the error escaped.
    pub middleware: &'static str,
    /// The terminal workflow instance.
    pub workflow: &'a WorkflowInstance,
    /// The error itself.
    pub error: &'a WorkflowError,
}

/// Strategy for errors escaping post-complete middleware.
///
/// An `Err` from [`handle`](Self::handle) is treated as a fatal
/// configuration defect and propagates out of the pipeline.
#[async_trait]
pub trait LifecycleErrorPolicy: Send + Sync {
    /// Reports the failure and decides whether the chain continues.
    async fn handle(&self, failure: MiddlewareFailure<'_>) -> Result<ErrorAction, WorkflowError>;
}

#[derive(Clone, Copy)]
enum Mode<'a> {
    Propagate,
    Absorb {
        policy: &'a dyn LifecycleErrorPolicy,
        entered: Option<&'a AtomicBool>,
        policy_error: Option<&'a OnceLock<WorkflowError>>,
    },
}

/// Continuation of a workflow lifecycle chain.
pub struct WorkflowNext<'a> {
    middleware: &'a [Arc<dyn WorkflowMiddleware>],
    mode: Mode<'a>,
}

impl<'a> WorkflowNext<'a> {
    /// Creates a chain in which any middleware error aborts the chain and is
    /// returned to the caller unchanged.
    pub fn propagating(middleware: &'a [Arc<dyn WorkflowMiddleware>]) -> Self {
        Self {
            middleware,
            mode: Mode::Propagate,
        }
    }

    /// Creates a chain in which an error escaping any middleware is handed to
    /// `policy` at that middleware's frame, after which the chain continues
    /// unless the policy answers [`ErrorAction::Halt`].
    pub fn absorbing(
        middleware: &'a [Arc<dyn WorkflowMiddleware>],
        policy: &'a dyn LifecycleErrorPolicy,
    ) -> Self {
        Self {
            middleware,
            mode: Mode::Absorb {
                policy,
                entered: None,
                policy_error: None,
            },
        }
    }

    /// Number of middleware still ahead.
    pub fn remaining(&self) -> usize {
        self.middleware.len()
    }

    /// Runs the remainder of the chain.
    ///
    /// In an absorbing chain this only fails when the error policy fails.
    /// That error is returned by every enclosing frame unchanged and is never
    /// handed to the policy again, even if a middleware drops it.
    pub fn run<'b>(self, workflow: &'b mut WorkflowInstance) -> BoxFuture<'b, Result<(), WorkflowError>>
    where
        'a: 'b,
    {
        match self.mode {
            Mode::Propagate => match self.middleware.split_first() {
                Some((current, rest)) => current.handle(workflow, WorkflowNext::propagating(rest)),
                None => Box::pin(async { Ok(()) }),
            },
            Mode::Absorb {
                policy,
                entered,
                policy_error,
            } => {
                if let Some(entered) = entered {
                    entered.store(true, Ordering::Release);
                }
                let middleware = self.middleware;
                match policy_error {
                    Some(slot) => Box::pin(run_absorbing(middleware, policy, slot, workflow)),
                    None => Box::pin(async move {
                        let slot = OnceLock::new();
                        let result = run_absorbing(middleware, policy, &slot, workflow).await;
                        match slot.into_inner() {
                            Some(error) => Err(error),
                            None => result,
                        }
                    }),
                }
            }
        }
    }
}

async fn run_absorbing(
    middleware: &[Arc<dyn WorkflowMiddleware>],
    policy: &dyn LifecycleErrorPolicy,
    policy_error: &OnceLock<WorkflowError>,
    workflow: &mut WorkflowInstance,
) -> Result<(), WorkflowError> {
    let Some((current, rest)) = middleware.split_first() else {
        return Ok(());
    };

    let entered = AtomicBool::new(false);
    let next = WorkflowNext {
        middleware: rest,
        mode: Mode::Absorb {
            policy,
            entered: Some(&entered),
            policy_error: Some(policy_error),
        },
    };

    let error = match current.handle(workflow, next).await {
        Ok(()) => return Ok(()),
        Err(error) => error,
    };

    // a failed policy is fatal for the whole chain
    if let Some(fatal) = policy_error.get() {
        return Err(fatal.clone());
    }

    let action = policy
        .handle(MiddlewareFailure {
            middleware: current.name(),
            workflow: &*workflow,
            error: &error,
        })
        .await;
    let action = match action {
        Ok(action) => action,
        Err(fatal) => {
            let _ = policy_error.set(fatal.clone());
            return Err(fatal);
        }
    };

    if action == ErrorAction::Continue && !entered.load(Ordering::Acquire) {
        let rest = WorkflowNext {
            middleware: rest,
            mode: Mode::Absorb {
                policy,
                entered: None,
                policy_error: Some(policy_error),
            },
        };
        rest.run(workflow).await
    } else {
        Ok(())
    }
}

impl fmt::Debug for WorkflowNext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            Mode::Propagate => "propagate",
            Mode::Absorb { .. } => "absorb",
        };
        f.debug_struct("WorkflowNext")
            .field(
                "middleware",
                &self.middleware.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("mode", &mode)
            .finish()
    }
}
