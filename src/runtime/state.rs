//! Runtime state.
//!
//! Everything the scheduler mutates lives in one [`RuntimeState`] behind a
//! `RefCell`. The scheduler never holds the borrow across user code: saga
//! polls, callables, subscribers, patterns, cleanup handlers and the error
//! hook all run with the state released.

use std::collections::{BTreeMap, VecDeque};

use crate::bus::ActionBus;
use crate::combinator::{Group, GroupId};
use crate::record::task::TaskRecord;
use crate::record::watcher::WatcherRegistry;
use crate::runtime::timer::TimerHeap;
use crate::types::TaskId;

/// Counters since the runtime was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Saga polls.
    pub steps: u64,
    /// Tasks created, branches included.
    pub tasks_spawned: u64,
    /// Tasks that completed normally.
    pub tasks_completed: u64,
    /// Tasks that were cancelled.
    pub tasks_cancelled: u64,
    /// Tasks that errored or panicked.
    pub tasks_errored: u64,
    /// Actions delivered on the bus.
    pub actions_dispatched: u64,
}

#[derive(Debug)]
pub(crate) struct RuntimeState {
    pub tasks: BTreeMap<TaskId, TaskRecord>,
    /// Tasks to poll, FIFO.
    pub ready: VecDeque<TaskId>,
    pub bus: ActionBus,
    pub timers: TimerHeap,
    pub groups: BTreeMap<GroupId, Group>,
    /// Groups with a branch settled since their last evaluation.
    pub dirty_groups: Vec<GroupId>,
    pub registry: WatcherRegistry,
    pub stats: RuntimeStats,
    next_task: u64,
    next_group: GroupId,
}

impl RuntimeState {
    pub(crate) fn new(max_watchers: usize) -> Self {
        Self {
            tasks: BTreeMap::new(),
            ready: VecDeque::new(),
            bus: ActionBus::new(),
            timers: TimerHeap::new(),
            groups: BTreeMap::new(),
            dirty_groups: Vec::new(),
            registry: WatcherRegistry::new(max_watchers),
            stats: RuntimeStats::default(),
            next_task: 0,
            next_group: 0,
        }
    }

    pub(crate) fn next_task_id(&mut self) -> TaskId {
        self.next_task += 1;
        TaskId::from_raw(self.next_task)
    }

    pub(crate) fn next_group_id(&mut self) -> GroupId {
        self.next_group += 1;
        self.next_group
    }

    pub(crate) fn mark_dirty(&mut self, group: GroupId) {
        if !self.dirty_groups.contains(&group) {
            self.dirty_groups.push(group);
        }
    }

    pub(crate) fn live_task_count(&self) -> usize {
        self.tasks.values().filter(|r| !r.is_terminal()).count()
    }

    /// Parentless records, in id order.
    pub(crate) fn roots(&self) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|r| r.parent.is_none())
            .map(|r| r.id)
            .collect()
    }

    /// Removes one settled record with no children and unlinks it from its
    /// parent. Returns the record and the parent id.
    pub(crate) fn remove_if_reapable(
        &mut self,
        id: TaskId,
    ) -> Option<(TaskRecord, Option<TaskId>)> {
        let reapable = self
            .tasks
            .get(&id)
            .is_some_and(|r| r.is_terminal() && r.children.is_empty());
        if !reapable {
            return None;
        }
        let record = self.tasks.remove(&id)?;
        let parent = record.parent;
        if let Some(p) = parent.and_then(|p| self.tasks.get_mut(&p)) {
            p.remove_child(id);
        }
        Some((record, parent))
    }
}
