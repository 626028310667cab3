//! Task record for the runtime.
//!
//! A task is a node in the cancellation tree. It owns one saga future, a
//! status, a parent link, its children, and the suspension it is parked on.

use core::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::channel::Channel;
use crate::combinator::GroupId;
use crate::cx::EffectSlot;
use crate::effect::{CallFuture, TaskFuture};
use crate::record::finalizer::FinalizerStack;
use crate::runtime::task_handle::TaskCell;
use crate::types::{CancelReason, TaskId};

/// The lifecycle status of a task.
///
/// `Created -> Running -> {Completed | Cancelled | Errored}`. The three
/// terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Spawned, never polled.
    Created,
    /// Polled at least once and not yet settled.
    Running,
    /// The saga returned normally.
    Completed,
    /// The task was cancelled.
    Cancelled,
    /// The saga returned an error or panicked.
    Errored,
}

impl TaskStatus {
    /// Returns true if the task is in a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Errored)
    }

    /// Returns true if moving to `next` respects the lifecycle.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Created, Self::Running) => true,
            (Self::Created | Self::Running, n) => n.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// How a task entered the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TaskKind {
    /// Root of a registered watcher.
    Watcher(Rc<str>),
    /// Un-parented fork from outside any task.
    Root,
    /// Attached child forked by a saga.
    Fork,
    /// Detached fork; a root with no parent.
    Detached,
    /// One labeled branch of a `race` or `all`.
    Branch(Rc<str>),
}

impl TaskKind {
    /// Errors settled by branches always reach the combinator that owns them.
    pub(crate) const fn reports_errors(&self) -> bool {
        !matches!(self, Self::Branch(_))
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Watcher(name) => write!(f, "watcher:{name}"),
            Self::Root => f.write_str("root"),
            Self::Fork => f.write_str("fork"),
            Self::Detached => f.write_str("detached"),
            Self::Branch(label) => write!(f, "branch:{label}"),
        }
    }
}

/// What a suspended task is parked on.
///
/// Cancellation uses this to unhook the task from whatever would resume it.
#[derive(Default)]
pub(crate) enum Wait {
    /// Not parked: ready, being polled, or settled.
    #[default]
    Idle,
    /// Registered as a bus taker.
    Take,
    /// Its `put` is queued on the bus.
    Put,
    /// Parked on a channel take or a blocking channel put.
    Channel(Channel),
    /// Parked on a delay timer.
    Timer(u64),
    /// Awaiting an external callable.
    Call {
        name: Rc<str>,
        future: CallFuture,
    },
    /// Joining another task.
    Join(TaskId),
    /// Awaiting a `race` or `all` group.
    Group(GroupId),
    /// Awaiting a foreign future through its waker.
    External,
}

impl Wait {
    pub(crate) const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl fmt::Debug for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Take => f.write_str("Take"),
            Self::Put => f.write_str("Put"),
            Self::Channel(ch) => f.debug_tuple("Channel").field(&ch.id()).finish(),
            Self::Timer(seq) => f.debug_tuple("Timer").field(seq).finish(),
            Self::Call { name, .. } => f.debug_tuple("Call").field(name).finish(),
            Self::Join(id) => f.debug_tuple("Join").field(id).finish(),
            Self::Group(id) => f.debug_tuple("Group").field(id).finish(),
            Self::External => f.write_str("External"),
        }
    }
}

/// Internal record for a task in the runtime.
pub(crate) struct TaskRecord {
    pub id: TaskId,
    pub parent: Option<TaskId>,
    /// Unreaped children, in spawn order.
    pub children: SmallVec<[TaskId; 4]>,
    pub kind: TaskKind,
    /// Saga name for logs.
    pub name: Rc<str>,
    /// Status and outcome, shared with every `TaskHandle`.
    pub cell: Rc<TaskCell>,
    pub slot: Rc<EffectSlot>,
    /// `None` while the scheduler is polling it, and after settlement.
    pub future: Option<TaskFuture>,
    pub wait: Wait,
    pub cleanup: FinalizerStack,
    /// Tasks parked on a `Join` of this one.
    pub joiners: SmallVec<[TaskId; 2]>,
    /// The `race`/`all` group this task is a branch of.
    pub group: Option<GroupId>,
    /// Someone awaits this task's result, so errors are not unhandled.
    pub observed: bool,
    /// Set once cancellation has started.
    pub cancelling: Option<CancelReason>,
}

impl TaskRecord {
    pub(crate) fn new(
        id: TaskId,
        parent: Option<TaskId>,
        kind: TaskKind,
        name: Rc<str>,
        cell: Rc<TaskCell>,
    ) -> Self {
        Self {
            id,
            parent,
            children: SmallVec::new(),
            kind,
            name,
            cell,
            slot: Rc::new(EffectSlot::new()),
            future: None,
            wait: Wait::Idle,
            cleanup: FinalizerStack::new(),
            joiners: SmallVec::new(),
            group: None,
            observed: false,
            cancelling: None,
        }
    }

    pub(crate) fn status(&self) -> TaskStatus {
        self.cell.status()
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Marks the first poll. Returns true on the `Created -> Running` edge.
    pub(crate) fn start_running(&mut self) -> bool {
        if self.status() == TaskStatus::Created {
            self.cell.transition(TaskStatus::Running);
            true
        } else {
            false
        }
    }

    /// Records a cancellation request, strengthening an in-flight one.
    ///
    /// Returns true if this is the first request.
    pub(crate) fn request_cancel(&mut self, reason: CancelReason) -> bool {
        match &mut self.cancelling {
            Some(existing) => {
                existing.strengthen(&reason);
                false
            }
            None => {
                self.cancelling = Some(reason);
                true
            }
        }
    }

    pub(crate) fn remove_child(&mut self, child: TaskId) {
        self.children.retain(|c| *c != child);
    }
}

impl fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("kind", &self.kind)
            .field("status", &self.status())
            .field("wait", &self.wait)
            .field("cleanup", &self.cleanup)
            .finish_non_exhaustive()
    }
}
