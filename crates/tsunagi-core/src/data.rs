//! Type-erased workflow payload.

use std::any::Any;
use std::fmt;

/// The caller-supplied payload of a workflow instance.
///
/// Stores any `Send + Sync` value, retrieved by downcasting to the concrete
/// type the workflow was started with.
///
/// # Examples
///
/// ```
/// use tsunagi_core::WorkflowData;
///
/// #[derive(Debug, PartialEq)]
/// struct Order {
///     id: u64,
/// }
///
/// let mut data = WorkflowData::new(Order { id: 7 });
/// assert_eq!(data.get::<Order>(), Some(&Order { id: 7 }));
///
/// if let Some(order) = data.get_mut::<Order>() {
///     order.id = 8;
/// }
/// assert_eq!(data.get::<Order>().map(|o| o.id), Some(8));
///
/// // Wrong type returns None
/// assert_eq!(data.get::<String>(), None);
/// ```
pub struct WorkflowData {
    value: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl WorkflowData {
    /// Wraps a payload value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Box::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// A payload carrying no data.
    pub fn empty() -> Self {
        Self::new(())
    }

    /// Returns `true` if the payload is of type `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Returns a reference to the payload if it is of type `T`.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Returns a mutable reference to the payload if it is of type `T`.
    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.value.downcast_mut::<T>()
    }

    /// Replaces the payload, returning the previous one.
    pub fn replace<T: Any + Send + Sync>(&mut self, value: T) -> WorkflowData {
        std::mem::replace(self, WorkflowData::new(value))
    }

    /// Consumes the wrapper and returns the payload if it is of type `T`.
    pub fn into_inner<T: Any>(self) -> Option<T> {
        self.value.downcast::<T>().ok().map(|b| *b)
    }

    /// Name of the stored type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl Default for WorkflowData {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for WorkflowData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowData")
            .field("type", &self.type_name)
            .finish()
    }
}
