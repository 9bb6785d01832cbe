//! Workflow instances and their execution pointers.

use crate::data::WorkflowData;
use crate::result::{ExecutionResult, ResultSignal};
use crate::step::{StepDefinition, StepId, StepName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use uuid::Uuid;

/// Opaque identifier of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(Uuid);

impl WorkflowId {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for WorkflowId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Constructed but not yet admitted by the pre-start chain.
    Created,
    /// Admitted and eligible for scheduling.
    Runnable,
    /// Admitted but paused by the scheduler.
    Suspended,
    /// Finished normally.
    Complete,
    /// Finished abnormally.
    Terminated,
}

impl WorkflowStatus {
    /// Returns `true` for `Complete` and `Terminated`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Complete | WorkflowStatus::Terminated)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Created => write!(f, "created"),
            WorkflowStatus::Runnable => write!(f, "runnable"),
            WorkflowStatus::Suspended => write!(f, "suspended"),
            WorkflowStatus::Complete => write!(f, "complete"),
            WorkflowStatus::Terminated => write!(f, "terminated"),
        }
    }
}

/// Status of one step's execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerStatus {
    /// Not yet attempted.
    Pending,
    /// An attempt is in flight.
    Running,
    /// The step finished.
    Complete,
    /// The last attempt failed and will not be retried by middleware.
    Failed,
    /// Waiting for `sleep_until` before the next attempt.
    Sleeping,
}

impl fmt::Display for PointerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointerStatus::Pending => write!(f, "pending"),
            PointerStatus::Running => write!(f, "running"),
            PointerStatus::Complete => write!(f, "complete"),
            PointerStatus::Failed => write!(f, "failed"),
            PointerStatus::Sleeping => write!(f, "sleeping"),
        }
    }
}

/// The execution record of one step within a workflow instance.
///
/// Step middleware may only touch `retry_count` and the timestamps;
/// `step_id` and `step_name` are owned by the definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPointer {
    /// Definition node this pointer executes.
    pub step_id: StepId,
    /// Label copied from the definition.
    pub step_name: StepName,
    /// Current status.
    pub status: PointerStatus,
    /// Set immediately before the middleware chain is invoked.
    pub start_time: Option<DateTime<Utc>>,
    /// Set immediately after the middleware chain returns or fails.
    pub end_time: Option<DateTime<Utc>>,
    /// Earliest time the next attempt may run.
    pub sleep_until: Option<DateTime<Utc>>,
    /// Number of retries scheduled so far. Never decremented.
    pub retry_count: u32,
    /// Last value the step produced.
    pub outcome: Option<Value>,
    /// Payload written by the step body for downstream steps.
    pub persisted_outputs: Option<Value>,
}

impl ExecutionPointer {
    /// Creates a pending pointer for the given definition node.
    pub fn new(step: &StepDefinition) -> Self {
        Self {
            step_id: step.id,
            step_name: step.name.clone(),
            status: PointerStatus::Pending,
            start_time: None,
            end_time: None,
            sleep_until: None,
            retry_count: 0,
            outcome: None,
            persisted_outputs: None,
        }
    }

    /// Marks the start of an attempt.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) {
        self.status = PointerStatus::Running;
        self.start_time = Some(now);
        self.end_time = None;
        self.sleep_until = None;
    }

    /// Records the result the chain produced for the current attempt.
    pub fn record_result(&mut self, result: &ExecutionResult, now: DateTime<Utc>) {
        self.end_time = Some(now);
        match result.signal() {
            ResultSignal::Retry | ResultSignal::Sleep => {
                self.status = PointerStatus::Sleeping;
                self.sleep_until = result
                    .proceed_after
                    .and_then(|after| chrono::Duration::from_std(after).ok())
                    .map(|after| now + after)
                    .or(Some(now));
            }
            ResultSignal::Fail => self.status = PointerStatus::Failed,
            ResultSignal::Proceed => {
                self.status = PointerStatus::Complete;
                self.outcome = result.outcome.clone();
            }
        }
    }

    /// Records an error that escaped the chain.
    pub fn record_error(&mut self, now: DateTime<Utc>) {
        self.end_time = Some(now);
        self.status = PointerStatus::Failed;
    }
}

/// One execution of a workflow definition.
///
/// # Examples
///
/// ```
/// use tsunagi_core::{StepDefinition, WorkflowInstance, WorkflowStatus};
///
/// let mut workflow = WorkflowInstance::new("order-fulfilment", 1, 42u32);
/// assert_eq!(workflow.status(), WorkflowStatus::Created);
///
/// let index = workflow.add_pointer(&StepDefinition::new(0, "reserve"));
/// assert_eq!(workflow.pointer(index).map(|p| p.step_name.as_str()), Some("reserve"));
/// ```
#[derive(Debug)]
pub struct WorkflowInstance {
    id: WorkflowId,
    definition_id: String,
    version: u32,
    reference: Option<String>,
    data: WorkflowData,
    description: Option<String>,
    status: WorkflowStatus,
    create_time: DateTime<Utc>,
    complete_time: Option<DateTime<Utc>>,
    execution_pointers: Vec<ExecutionPointer>,
}

impl WorkflowInstance {
    /// Creates an instance in the `Created` status.
    pub fn new<T: Any + Send + Sync>(definition_id: impl Into<String>, version: u32, data: T) -> Self {
        Self {
            id: WorkflowId::new(),
            definition_id: definition_id.into(),
            version,
            reference: None,
            data: WorkflowData::new(data),
            description: None,
            status: WorkflowStatus::Created,
            create_time: Utc::now(),
            complete_time: None,
            execution_pointers: Vec::new(),
        }
    }

    /// Attaches a caller-defined reference.
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn id(&self) -> WorkflowId {
        self.id
    }

    pub fn definition_id(&self) -> &str {
        &self.definition_id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn data(&self) -> &WorkflowData {
        &self.data
    }

    /// Mutable payload access. Only pre-start middleware should use this.
    pub fn data_mut(&mut self) -> &mut WorkflowData {
        &mut self.data
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    pub fn complete_time(&self) -> Option<DateTime<Utc>> {
        self.complete_time
    }

    /// Pointers in invocation order.
    pub fn execution_pointers(&self) -> &[ExecutionPointer] {
        &self.execution_pointers
    }

    pub(crate) fn execution_pointers_mut(&mut self) -> &mut [ExecutionPointer] {
        &mut self.execution_pointers
    }

    pub fn pointer(&self, index: usize) -> Option<&ExecutionPointer> {
        self.execution_pointers.get(index)
    }

    pub fn pointer_mut(&mut self, index: usize) -> Option<&mut ExecutionPointer> {
        self.execution_pointers.get_mut(index)
    }

    /// Appends a pending pointer for `step` and returns its index.
    pub fn add_pointer(&mut self, step: &StepDefinition) -> usize {
        self.execution_pointers.push(ExecutionPointer::new(step));
        self.execution_pointers.len() - 1
    }

    /// Admits the instance for scheduling.
    pub fn mark_runnable(&mut self) {
        self.status = WorkflowStatus::Runnable;
    }

    /// Pauses an admitted instance.
    pub fn suspend(&mut self) {
        self.status = WorkflowStatus::Suspended;
    }

    /// Transitions to `Complete` and stamps `complete_time`.
    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.status = WorkflowStatus::Complete;
        self.complete_time = Some(at);
    }

    /// Transitions to `Terminated` and stamps `complete_time`.
    pub fn terminate(&mut self, at: DateTime<Utc>) {
        self.status = WorkflowStatus::Terminated;
        self.complete_time = Some(at);
    }

    /// Puts back a terminal status and completion time captured earlier.
    pub fn restore_terminal(&mut self, status: WorkflowStatus, complete_time: Option<DateTime<Utc>>) {
        if status.is_terminal() {
            self.status = status;
            self.complete_time = complete_time;
        }
    }
}
