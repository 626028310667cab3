//! The saga context.
//!
//! Every task receives a [`Cx`]. Awaiting [`Cx::run`] is the only way a saga
//! suspends on an effect: the future stores the effect in the task's slot and
//! returns `Pending`; the scheduler picks the effect up, resolves it, fills
//! the slot and polls the saga again. An error raised while resolving the
//! effect surfaces as the `Err` of that await, so `?` propagates it and a
//! `match` at the await recovers locally.
//!
//! The typed helpers (`call`, `take`, `fork`, ...) wrap `run` and the matching
//! [`Resume`] accessor.

use core::fmt;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;

use crate::channel::{Channel, ChannelItem};
use crate::effect::{self, AllResult, Callable, Effect, RaceResult, Resume, Saga};
use crate::error::{Error, Result};
use crate::runtime::scheduler::RuntimeInner;
use crate::runtime::TaskHandle;
use crate::runtime::task_handle::TaskCell;
use crate::types::{Action, Pattern, TaskId, Time};

enum SlotState {
    Idle,
    Requested(Effect),
    Waiting,
    Ready(Result<Resume>),
}

/// The single-effect mailbox between a saga and the scheduler.
pub(crate) struct EffectSlot {
    state: RefCell<SlotState>,
}

impl EffectSlot {
    pub(crate) fn new() -> Self {
        Self {
            state: RefCell::new(SlotState::Idle),
        }
    }

    /// Takes the effect the saga just yielded, leaving the slot waiting.
    pub(crate) fn take_request(&self) -> Option<Effect> {
        let mut state = self.state.borrow_mut();
        match std::mem::replace(&mut *state, SlotState::Waiting) {
            SlotState::Requested(effect) => Some(effect),
            other => {
                *state = other;
                None
            }
        }
    }

    /// Delivers the resolution of the pending effect.
    pub(crate) fn fill(&self, result: Result<Resume>) {
        let mut state = self.state.borrow_mut();
        debug_assert!(matches!(*state, SlotState::Waiting));
        *state = SlotState::Ready(result);
    }
}

impl fmt::Debug for EffectSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.borrow() {
            SlotState::Idle => "idle",
            SlotState::Requested(_) => "requested",
            SlotState::Waiting => "waiting",
            SlotState::Ready(_) => "ready",
        };
        f.debug_tuple("EffectSlot").field(&state).finish()
    }
}

/// Future returned by [`Cx::run`].
#[must_use = "effects do nothing unless awaited"]
pub struct EffectFuture {
    slot: Rc<EffectSlot>,
    effect: Option<Effect>,
}

impl Future for EffectFuture {
    type Output = Result<Resume>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(effect) = self.effect.take() {
            let mut state = self.slot.state.borrow_mut();
            if !matches!(*state, SlotState::Idle) {
                return Poll::Ready(Err(Error::internal(
                    "a task may await only one effect at a time",
                )));
            }
            *state = SlotState::Requested(effect);
            return Poll::Pending;
        }
        let mut state = self.slot.state.borrow_mut();
        match std::mem::replace(&mut *state, SlotState::Idle) {
            SlotState::Ready(result) => Poll::Ready(result),
            other => {
                *state = other;
                Poll::Pending
            }
        }
    }
}

/// Context handed to every saga.
///
/// Cheap to clone. Clones refer to the same task; use them only from that
/// task's own body.
#[derive(Clone)]
pub struct Cx {
    task: TaskId,
    slot: Rc<EffectSlot>,
    cell: Rc<TaskCell>,
    rt: Weak<RuntimeInner>,
}

impl Cx {
    pub(crate) fn new(
        task: TaskId,
        slot: Rc<EffectSlot>,
        cell: Rc<TaskCell>,
        rt: Weak<RuntimeInner>,
    ) -> Self {
        Self {
            task,
            slot,
            cell,
            rt,
        }
    }

    /// Returns the id of the running task.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.task
    }

    /// Returns a handle to the running task.
    #[must_use]
    pub fn handle(&self) -> TaskHandle {
        TaskHandle::new(Rc::clone(&self.cell))
    }

    /// Returns the runtime's current time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.rt.upgrade().map_or(Time::ZERO, |rt| rt.now())
    }

    /// Registers a cleanup handler.
    ///
    /// Handlers run exactly once when the task settles, on every exit path,
    /// in reverse registration order.
    pub fn on_cleanup(&self, handler: impl FnOnce() + 'static) {
        if let Some(rt) = self.rt.upgrade() {
            rt.push_cleanup(self.task, Box::new(handler));
        }
    }

    /// Yields `effect` to the interpreter and resumes with its resolution.
    pub fn run(&self, effect: Effect) -> EffectFuture {
        EffectFuture {
            slot: Rc::clone(&self.slot),
            effect: Some(effect),
        }
    }

    /// Invokes an external callable.
    pub async fn call(&self, callable: Callable, args: Vec<Value>) -> Result<Value> {
        self.run(effect::call(callable, args)).await?.into_value()
    }

    /// Runs `saga` as an attached child and waits for its value.
    pub async fn call_saga(&self, saga: Saga, args: Vec<Value>) -> Result<Value> {
        self.run(effect::call_saga(saga, args)).await?.into_value()
    }

    /// Dispatches `action`; returns once the bus has delivered it.
    pub async fn put(&self, action: impl Into<Action>) -> Result<()> {
        self.run(effect::put(action)).await?.into_unit()
    }

    /// Waits for the next matching action.
    pub async fn take(&self, pattern: impl Into<Pattern>) -> Result<Action> {
        self.run(effect::take(pattern)).await?.into_action()
    }

    /// Waits for the next channel item or the closed sentinel.
    pub async fn take_channel(&self, channel: &Channel) -> Result<ChannelItem> {
        self.run(effect::take_channel(channel)).await?.into_item()
    }

    /// Offers a value to a channel.
    pub async fn put_channel(&self, channel: &Channel, value: impl Into<Value>) -> Result<()> {
        self.run(effect::put_channel(channel, value))
            .await?
            .into_unit()
    }

    /// Closes a channel.
    pub async fn close_channel(&self, channel: &Channel) -> Result<()> {
        self.run(effect::close_channel(channel)).await?.into_unit()
    }

    /// Forks an attached child.
    pub async fn fork(&self, saga: Saga, args: Vec<Value>) -> Result<TaskHandle> {
        self.run(effect::fork(saga, args)).await?.into_task()
    }

    /// Forks a detached root.
    pub async fn spawn(&self, saga: Saga, args: Vec<Value>) -> Result<TaskHandle> {
        self.run(effect::spawn(saga, args)).await?.into_task()
    }

    /// Waits for a saga task and returns its value.
    pub async fn join(&self, task: &TaskHandle) -> Result<Value> {
        self.run(effect::join(task)).await?.into_value()
    }

    /// Cancels a task subtree and waits for its cleanup.
    pub async fn cancel(&self, task: &TaskHandle) -> Result<()> {
        self.run(effect::cancel(task)).await?.into_unit()
    }

    /// Races labeled effects.
    pub async fn race<I, L>(&self, effects: I) -> Result<RaceResult>
    where
        I: IntoIterator<Item = (L, Effect)>,
        L: Into<String>,
    {
        self.run(effect::race(effects)).await?.into_race()
    }

    /// Runs labeled effects and waits for all of them.
    pub async fn all<I, L>(&self, effects: I) -> Result<AllResult>
    where
        I: IntoIterator<Item = (L, Effect)>,
        L: Into<String>,
    {
        self.run(effect::all(effects)).await?.into_all()
    }

    /// Sleeps for `ms` milliseconds.
    pub async fn delay(&self, ms: u64) -> Result<()> {
        self.run(effect::delay(ms)).await?.into_unit()
    }

    /// Sleeps for `duration`.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(effect::sleep(duration)).await?.into_unit()
    }
}

impl fmt::Debug for Cx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cx")
            .field("task", &self.task)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}
