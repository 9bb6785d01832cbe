//! Borrowed view handed to step middleware and step bodies.

use crate::error::WorkflowError;
use crate::instance::{ExecutionPointer, WorkflowInstance};
use crate::step::StepDefinition;

/// The view of one step attempt.
///
/// Holds the owning instance and the step definition by reference and
/// addresses the current pointer by index, so nothing outlives the attempt.
/// The instance is exposed read-only; only the current pointer is mutable.
///
/// # Examples
///
/// ```
/// use tsunagi_core::{StepDefinition, StepExecutionContext, WorkflowInstance};
///
/// let step = StepDefinition::new(0, "charge");
/// let mut workflow = WorkflowInstance::new("billing", 1, ());
/// let index = workflow.add_pointer(&step);
///
/// let mut ctx = StepExecutionContext::new(&mut workflow, index, &step)?;
/// ctx.pointer_mut().retry_count += 1;
/// assert_eq!(ctx.pointer().retry_count, 1);
/// assert_eq!(ctx.workflow().definition_id(), "billing");
/// # Ok::<(), tsunagi_core::WorkflowError>(())
/// ```
#[derive(Debug)]
pub struct StepExecutionContext<'a> {
    workflow: &'a mut WorkflowInstance,
    pointer_index: usize,
    step: &'a StepDefinition,
}

impl<'a> StepExecutionContext<'a> {
    /// Creates a context for the pointer at `pointer_index`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::PointerNotFound`] if the instance has no
    /// pointer at that index.
    pub fn new(
        workflow: &'a mut WorkflowInstance,
        pointer_index: usize,
        step: &'a StepDefinition,
    ) -> Result<Self, WorkflowError> {
        if workflow.pointer(pointer_index).is_none() {
            return Err(WorkflowError::PointerNotFound {
                workflow_id: workflow.id(),
                index: pointer_index,
            });
        }
        Ok(Self {
            workflow,
            pointer_index,
            step,
        })
    }

    /// The owning workflow instance.
    pub fn workflow(&self) -> &WorkflowInstance {
        self.workflow
    }

    /// The definition of the step being executed.
    pub fn step(&self) -> &StepDefinition {
        self.step
    }

    /// Index of the current pointer within the instance.
    pub fn pointer_index(&self) -> usize {
        self.pointer_index
    }

    // `new` checked the index and the exclusive borrow keeps the pointer
    // list from shrinking, so both accessors index it directly.

    /// The current execution pointer.
    pub fn pointer(&self) -> &ExecutionPointer {
        &self.workflow.execution_pointers()[self.pointer_index]
    }

    /// Mutable access to the current execution pointer.
    pub fn pointer_mut(&mut self) -> &mut ExecutionPointer {
        &mut self.workflow.execution_pointers_mut()[self.pointer_index]
    }
}
