//! Task handles.
//!
//! A [`TaskHandle`] shares a small cell with the task record. The cell holds
//! the status and the outcome, so a handle keeps answering after the record
//! has been reaped from the task table.

use core::fmt;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::effect::Resume;
use crate::record::TaskStatus;
use crate::types::{Outcome, TaskId};

/// Status and outcome of one task.
#[derive(Debug)]
pub(crate) struct TaskCell {
    id: TaskId,
    status: Cell<TaskStatus>,
    outcome: RefCell<Option<Outcome<Resume>>>,
}

impl TaskCell {
    pub(crate) fn new(id: TaskId) -> Self {
        Self {
            id,
            status: Cell::new(TaskStatus::Created),
            outcome: RefCell::new(None),
        }
    }

    pub(crate) fn status(&self) -> TaskStatus {
        self.status.get()
    }

    /// Moves the status forward.
    ///
    /// # Panics
    ///
    /// Panics on a transition out of a terminal state; that is a scheduler bug.
    pub(crate) fn transition(&self, next: TaskStatus) {
        let current = self.status.get();
        assert!(
            current.can_transition_to(next),
            "task {} cannot move from {current} to {next}",
            self.id
        );
        self.status.set(next);
    }

    /// Stores the outcome and moves to the matching terminal status.
    pub(crate) fn settle(&self, outcome: Outcome<Resume>) {
        let next = match &outcome {
            Outcome::Ok(_) => TaskStatus::Completed,
            Outcome::Err(_) => TaskStatus::Errored,
            Outcome::Cancelled(_) => TaskStatus::Cancelled,
        };
        self.transition(next);
        *self.outcome.borrow_mut() = Some(outcome);
    }

    pub(crate) fn outcome(&self) -> Option<Outcome<Resume>> {
        self.outcome.borrow().clone()
    }
}

/// A cheap, clonable reference to a task.
///
/// Handles compare equal when they refer to the same task.
#[derive(Clone)]
pub struct TaskHandle {
    cell: Rc<TaskCell>,
}

impl TaskHandle {
    pub(crate) fn new(cell: Rc<TaskCell>) -> Self {
        Self { cell }
    }

    /// Returns the task id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.cell.id
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.cell.status()
    }

    /// Returns true until the task settles.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.status().is_terminal()
    }

    /// Returns true once the task has completed, errored or been cancelled.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Returns the outcome once the task has settled.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome<Resume>> {
        self.cell.outcome()
    }

    pub(crate) fn cell(&self) -> &Rc<TaskCell> {
        &self.cell
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for TaskHandle {}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("status", &self.status())
            .finish()
    }
}
