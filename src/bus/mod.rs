//! The action bus.
//!
//! Dispatched actions are queued and delivered one at a time by the
//! scheduler loop. Delivering an action resumes every matching taker in
//! registration order, then calls every raw subscriber, then resumes the
//! task that `put` it. Actions dispatched while a delivery is in progress
//! (from a subscriber, a resumed task, or a nested `put`) wait in the queue,
//! so every observer sees actions in dispatch order.

use core::fmt;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use crate::runtime::scheduler::RuntimeInner;
use crate::types::{Action, Pattern, SubscriptionId, TaskId};

/// A raw interceptor called with every delivered action.
pub(crate) type Listener = Rc<dyn Fn(&Action)>;

/// A task parked on a pattern `take`.
#[derive(Debug)]
pub(crate) struct Taker {
    pub task: TaskId,
    pub pattern: Pattern,
}

/// An action waiting for delivery.
#[derive(Debug)]
pub(crate) struct Queued {
    pub action: Action,
    /// The task whose `put` produced the action; resumed after delivery.
    pub putter: Option<TaskId>,
}

#[derive(Default)]
pub(crate) struct ActionBus {
    takers: Vec<Taker>,
    subscribers: Vec<(SubscriptionId, Listener)>,
    queue: VecDeque<Queued>,
    next_subscription: u64,
}

impl ActionBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enqueue(&mut self, action: Action, putter: Option<TaskId>) {
        self.queue.push_back(Queued { action, putter });
    }

    pub(crate) fn pop_queued(&mut self) -> Option<Queued> {
        self.queue.pop_front()
    }

    #[cfg(test)]
    pub(crate) fn has_queued(&self) -> bool {
        !self.queue.is_empty()
    }

    pub(crate) fn add_taker(&mut self, task: TaskId, pattern: Pattern) {
        self.takers.push(Taker { task, pattern });
    }

    pub(crate) fn remove_taker(&mut self, task: TaskId) {
        self.takers.retain(|t| t.task != task);
    }

    /// Drops the undelivered action of a cancelled putter.
    pub(crate) fn drop_put(&mut self, task: TaskId) {
        self.queue.retain(|queued| queued.putter != Some(task));
    }

    /// Moves the taker list out so patterns can be evaluated without the
    /// runtime borrowed.
    pub(crate) fn take_takers(&mut self) -> Vec<Taker> {
        std::mem::take(&mut self.takers)
    }

    /// Puts back the unmatched takers ahead of any registered meanwhile.
    pub(crate) fn restore_takers(&mut self, mut rest: Vec<Taker>) {
        rest.append(&mut self.takers);
        self.takers = rest;
    }

    #[cfg(test)]
    pub(crate) fn taker_count(&self) -> usize {
        self.takers.len()
    }

    pub(crate) fn subscribe(&mut self, listener: Listener) -> SubscriptionId {
        self.next_subscription += 1;
        let id = SubscriptionId::from_raw(self.next_subscription);
        self.subscribers.push((id, listener));
        id
    }

    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    pub(crate) fn subscribers(&self) -> Vec<Listener> {
        self.subscribers.iter().map(|(_, l)| Rc::clone(l)).collect()
    }
}

impl fmt::Debug for ActionBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionBus")
            .field("takers", &self.takers.len())
            .field("subscribers", &self.subscribers.len())
            .field("queued", &self.queue.len())
            .finish()
    }
}

/// Splits takers into those matching `action` (FIFO) and the rest.
pub(crate) fn match_takers(takers: Vec<Taker>, action: &Action) -> (Vec<TaskId>, Vec<Taker>) {
    let mut matched = Vec::new();
    let mut rest = Vec::with_capacity(takers.len());
    for taker in takers {
        if taker.pattern.matches(action) {
            matched.push(taker.task);
        } else {
            rest.push(taker);
        }
    }
    (matched, rest)
}

/// Handle returned by [`Runtime::subscribe`](crate::Runtime::subscribe).
///
/// Dropping the handle keeps the subscription; call [`unsubscribe`](Self::unsubscribe).
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rt: Weak<RuntimeInner>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, rt: Weak<RuntimeInner>) -> Self {
        Self { id, rt }
    }

    /// Returns the subscription id.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Removes the listener. Returns false if it was already removed.
    pub fn unsubscribe(self) -> bool {
        self.rt
            .upgrade()
            .is_some_and(|rt| rt.unsubscribe(self.id))
    }
}
