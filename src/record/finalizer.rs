//! Cleanup handlers attached to a task.
//!
//! Handlers are the `finally` blocks of a saga. They run exactly once when the
//! task settles, whether it completed, errored or was cancelled, in LIFO
//! order so resources are released in reverse acquisition order.

use std::fmt;

/// A cleanup handler registered through [`Cx::on_cleanup`](crate::cx::Cx::on_cleanup).
pub(crate) type Cleanup = Box<dyn FnOnce()>;

/// A stack of cleanup handlers with LIFO semantics.
#[derive(Default)]
pub(crate) struct FinalizerStack {
    handlers: Vec<Cleanup>,
}

impl FinalizerStack {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Pushes a handler onto the stack.
    pub(crate) fn push(&mut self, handler: Cleanup) {
        self.handlers.push(handler);
    }

    /// Pops a handler from the stack (LIFO order).
    pub(crate) fn pop(&mut self) -> Option<Cleanup> {
        self.handlers.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Takes every handler, leaving the stack empty.
    pub(crate) fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}

impl fmt::Debug for FinalizerStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizerStack")
            .field("pending", &self.handlers.len())
            .finish()
    }
}
