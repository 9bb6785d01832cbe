//! Built-in middleware.
//!
//! Step middleware nest in registration order, so register
//! [`LogCorrelationMiddleware`] first to have every other middleware log
//! inside its span, and [`RetryMiddleware`] before [`TimeoutMiddleware`] so
//! that expired attempts are turned into retries.

mod correlation;
mod metrics;
mod retry;
mod summary;
mod timeout;

pub use correlation::LogCorrelationMiddleware;
pub use metrics::{MetricsMiddleware, StepMetricsSnapshot};
pub use retry::RetryMiddleware;
pub use summary::WorkflowSummaryMiddleware;
pub use timeout::TimeoutMiddleware;
