//! Effect descriptors.
//!
//! An [`Effect`] is inert data describing one requested operation. A saga
//! hands exactly one effect to the interpreter per suspension point (through
//! [`Cx::run`](crate::cx::Cx::run)) and is resumed with a [`Resume`] value or
//! with the error raised while resolving it.
//!
//! The free functions in this module are the effect constructors:
//!
//! ```rust,ignore
//! use sidefx::effect::{all, call, delay, put, race, take};
//!
//! let timeout = race([("data", call(fetch.clone(), vec![])), ("timeout", delay(500))]);
//! ```

use core::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;

use crate::channel::{Channel, ChannelItem};
use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::runtime::TaskHandle;
use crate::types::{Action, CancelReason, Pattern};

/// Future returned by a saga body.
pub type SagaFuture = Pin<Box<dyn Future<Output = Result<Value>>>>;

/// Future returned by an external callable.
pub type CallFuture = Pin<Box<dyn Future<Output = Result<Value>>>>;

/// What the scheduler drives for each task.
pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = Result<Resume>>>>;

/// A coroutine factory: builds a fresh saga body for each task that runs it.
#[derive(Clone)]
pub struct Saga {
    name: Rc<str>,
    body: Rc<dyn Fn(Cx, Vec<Value>) -> SagaFuture>,
}

impl Saga {
    /// Wraps an async body.
    ///
    /// ```rust,ignore
    /// let echo = Saga::new(|cx, _args| async move {
    ///     let action = cx.take("PING").await?;
    ///     cx.put(Action::new("PONG")).await?;
    ///     Ok(action.payload.unwrap_or_default())
    /// });
    /// ```
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: Fn(Cx, Vec<Value>) -> Fut + 'static,
        Fut: Future<Output = Result<Value>> + 'static,
    {
        Self::named("saga", body)
    }

    /// Wraps an async body under a name used in logs.
    pub fn named<F, Fut>(name: impl Into<Rc<str>>, body: F) -> Self
    where
        F: Fn(Cx, Vec<Value>) -> Fut + 'static,
        Fut: Future<Output = Result<Value>> + 'static,
    {
        Self {
            name: name.into(),
            body: Rc::new(move |cx: Cx, args: Vec<Value>| -> SagaFuture {
                Box::pin(body(cx, args))
            }),
        }
    }

    /// Returns the saga name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_rc(&self) -> Rc<str> {
        Rc::clone(&self.name)
    }

    pub(crate) fn start(&self, cx: Cx, args: Vec<Value>) -> SagaFuture {
        (self.body)(cx, args)
    }
}

impl fmt::Debug for Saga {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Saga").field(&self.name).finish()
    }
}

/// An external operation invoked by a `call` effect.
///
/// The runtime only needs the callable to eventually settle. Cancelling the
/// calling task drops the returned future; a callable that wants to observe
/// cancellation can do so from its future's `Drop`.
#[derive(Clone)]
pub struct Callable {
    name: Rc<str>,
    func: Rc<dyn Fn(Vec<Value>) -> CallFuture>,
}

impl Callable {
    /// Wraps an asynchronous function.
    pub fn new<F, Fut>(name: impl Into<Rc<str>>, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + 'static,
        Fut: Future<Output = Result<Value>> + 'static,
    {
        Self {
            name: name.into(),
            func: Rc::new(move |args: Vec<Value>| -> CallFuture { Box::pin(func(args)) }),
        }
    }

    /// Wraps a synchronous function; the call settles on first poll.
    pub fn from_fn<F>(name: impl Into<Rc<str>>, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value> + 'static,
    {
        Self {
            name: name.into(),
            func: Rc::new(move |args: Vec<Value>| -> CallFuture {
                Box::pin(std::future::ready(func(args)))
            }),
        }
    }

    /// Returns the callable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_rc(&self) -> Rc<str> {
        Rc::clone(&self.name)
    }

    pub(crate) fn invoke(&self, args: Vec<Value>) -> CallFuture {
        (self.func)(args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callable").field(&self.name).finish()
    }
}

/// Where a `take` waits.
#[derive(Debug, Clone)]
pub enum TakeSource {
    /// The next dispatched action matching the pattern.
    Pattern(Pattern),
    /// The next item of a channel.
    Channel(Channel),
}

/// A channel operation.
#[derive(Debug, Clone)]
pub enum ChannelOp {
    /// Offer a value; may park under a full fixed buffer.
    Put(Value),
    /// Take the next item or the closed sentinel.
    Take,
    /// Close the channel.
    Close,
}

/// Labeled effects for `race` and `all`, in declaration order.
pub type Labeled = Vec<(String, Effect)>;

/// One requested operation.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Invoke an external callable; resumes with its value.
    Call {
        /// The callable.
        callable: Callable,
        /// Arguments passed to it.
        args: Vec<Value>,
    },
    /// Run a saga as an attached child and wait for it; resumes with its value.
    CallSaga {
        /// The saga.
        saga: Saga,
        /// Arguments passed to it.
        args: Vec<Value>,
    },
    /// Dispatch an action; resumes once the bus has delivered it.
    Put {
        /// The action.
        action: Action,
    },
    /// Wait for an action or a channel item.
    Take {
        /// What to wait on.
        source: TakeSource,
    },
    /// Start a task without waiting; resumes immediately with its handle.
    Fork {
        /// The saga.
        saga: Saga,
        /// Arguments passed to it.
        args: Vec<Value>,
        /// Start a new root instead of a child of the forking task.
        detached: bool,
    },
    /// Wait for a task to settle.
    Join {
        /// The task.
        task: TaskHandle,
    },
    /// Cancel a task subtree; resumes once its cleanup has finished.
    Cancel {
        /// The task.
        task: TaskHandle,
        /// Recorded on the target; its descendants record `ParentCancelled`.
        reason: CancelReason,
    },
    /// First branch to settle wins; the rest are cancelled.
    Race {
        /// The branches.
        effects: Labeled,
    },
    /// Wait for every branch; fail fast on the first failure.
    All {
        /// The branches.
        effects: Labeled,
    },
    /// Sleep.
    Delay {
        /// How long.
        duration: Duration,
    },
    /// Operate on a channel.
    Channel {
        /// The channel.
        channel: Channel,
        /// The operation.
        op: ChannelOp,
    },
}

impl Effect {
    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Call { .. } => "call",
            Self::CallSaga { .. } => "call_saga",
            Self::Put { .. } => "put",
            Self::Take { .. } => "take",
            Self::Fork {
                detached: false, ..
            } => "fork",
            Self::Fork { detached: true, .. } => "spawn",
            Self::Join { .. } => "join",
            Self::Cancel { .. } => "cancel",
            Self::Race { .. } => "race",
            Self::All { .. } => "all",
            Self::Delay { .. } => "delay",
            Self::Channel {
                op: ChannelOp::Put(_),
                ..
            } => "channel_put",
            Self::Channel {
                op: ChannelOp::Take,
                ..
            } => "channel_take",
            Self::Channel {
                op: ChannelOp::Close,
                ..
            } => "channel_close",
        }
    }
}

/// What a saga is resumed with after an effect resolves.
#[derive(Debug, Clone, PartialEq)]
pub enum Resume {
    /// `put`, `delay`, `cancel`, channel put and close.
    Unit,
    /// `call`, `call_saga`, and `join` of a saga.
    Value(Value),
    /// `take` on a pattern.
    Action(Action),
    /// `fork` and `spawn`.
    Task(TaskHandle),
    /// `take` on a channel.
    Item(ChannelItem),
    /// `race`.
    Race(RaceResult),
    /// `all`.
    All(AllResult),
}

impl Resume {
    /// Short name of the variant.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Value(_) => "value",
            Self::Action(_) => "action",
            Self::Task(_) => "task",
            Self::Item(_) => "channel item",
            Self::Race(_) => "race result",
            Self::All(_) => "all result",
        }
    }

    /// Expects [`Resume::Unit`].
    pub fn into_unit(self) -> Result<()> {
        match self {
            Self::Unit => Ok(()),
            other => Err(Error::unexpected_resume("unit", other.kind())),
        }
    }

    /// Expects [`Resume::Value`].
    pub fn into_value(self) -> Result<Value> {
        match self {
            Self::Value(v) => Ok(v),
            other => Err(Error::unexpected_resume("value", other.kind())),
        }
    }

    /// Expects [`Resume::Action`].
    pub fn into_action(self) -> Result<Action> {
        match self {
            Self::Action(a) => Ok(a),
            other => Err(Error::unexpected_resume("action", other.kind())),
        }
    }

    /// Expects [`Resume::Task`].
    pub fn into_task(self) -> Result<TaskHandle> {
        match self {
            Self::Task(t) => Ok(t),
            other => Err(Error::unexpected_resume("task", other.kind())),
        }
    }

    /// Expects [`Resume::Item`].
    pub fn into_item(self) -> Result<ChannelItem> {
        match self {
            Self::Item(i) => Ok(i),
            other => Err(Error::unexpected_resume("channel item", other.kind())),
        }
    }

    /// Expects [`Resume::Race`].
    pub fn into_race(self) -> Result<RaceResult> {
        match self {
            Self::Race(r) => Ok(r),
            other => Err(Error::unexpected_resume("race result", other.kind())),
        }
    }

    /// Expects [`Resume::All`].
    pub fn into_all(self) -> Result<AllResult> {
        match self {
            Self::All(a) => Ok(a),
            other => Err(Error::unexpected_resume("all result", other.kind())),
        }
    }
}

/// Outcome of a `race`: only the winning label carries a value.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceResult {
    winner: String,
    value: Box<Resume>,
}

impl RaceResult {
    pub(crate) fn new(winner: String, value: Resume) -> Self {
        Self {
            winner,
            value: Box::new(value),
        }
    }

    /// The winning label.
    #[must_use]
    pub fn winner(&self) -> &str {
        &self.winner
    }

    /// The value under `label`; `None` for every loser.
    #[must_use]
    pub fn get(&self, label: &str) -> Option<&Resume> {
        (self.winner == label).then_some(&*self.value)
    }

    /// Consumes the result into `(winner, value)`.
    #[must_use]
    pub fn into_parts(self) -> (String, Resume) {
        (self.winner, *self.value)
    }
}

/// Outcome of an `all`: every label with its value, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllResult {
    entries: Vec<(String, Resume)>,
}

impl AllResult {
    pub(crate) fn new(entries: Vec<(String, Resume)>) -> Self {
        Self { entries }
    }

    /// The value under `label`.
    #[must_use]
    pub fn get(&self, label: &str) -> Option<&Resume> {
        self.entries.iter().find(|(l, _)| l == label).map(|(_, v)| v)
    }

    /// Number of branches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true for an empty `all`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(label, value)` in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Resume)> {
        self.entries.iter().map(|(l, v)| (l.as_str(), v))
    }

    /// Consumes the result into its entries.
    #[must_use]
    pub fn into_entries(self) -> Vec<(String, Resume)> {
        self.entries
    }
}

fn labeled<I, L>(effects: I) -> Labeled
where
    I: IntoIterator<Item = (L, Effect)>,
    L: Into<String>,
{
    effects.into_iter().map(|(l, e)| (l.into(), e)).collect()
}

/// Invokes an external callable.
#[must_use]
pub fn call(callable: Callable, args: Vec<Value>) -> Effect {
    Effect::Call { callable, args }
}

/// Runs `saga` as an attached child and waits for its value.
#[must_use]
pub fn call_saga(saga: Saga, args: Vec<Value>) -> Effect {
    Effect::CallSaga { saga, args }
}

/// Dispatches an action on the bus.
#[must_use]
pub fn put(action: impl Into<Action>) -> Effect {
    Effect::Put {
        action: action.into(),
    }
}

/// Waits for the next action matching `pattern`.
#[must_use]
pub fn take(pattern: impl Into<Pattern>) -> Effect {
    Effect::Take {
        source: TakeSource::Pattern(pattern.into()),
    }
}

/// Waits for the next item of `channel`.
#[must_use]
pub fn take_channel(channel: &Channel) -> Effect {
    Effect::Take {
        source: TakeSource::Channel(channel.clone()),
    }
}

/// Offers `value` to `channel`.
#[must_use]
pub fn put_channel(channel: &Channel, value: impl Into<Value>) -> Effect {
    Effect::Channel {
        channel: channel.clone(),
        op: ChannelOp::Put(value.into()),
    }
}

/// Closes `channel`.
#[must_use]
pub fn close_channel(channel: &Channel) -> Effect {
    Effect::Channel {
        channel: channel.clone(),
        op: ChannelOp::Close,
    }
}

/// Forks an attached child task.
#[must_use]
pub fn fork(saga: Saga, args: Vec<Value>) -> Effect {
    Effect::Fork {
        saga,
        args,
        detached: false,
    }
}

/// Forks a detached root task.
#[must_use]
pub fn spawn(saga: Saga, args: Vec<Value>) -> Effect {
    Effect::Fork {
        saga,
        args,
        detached: true,
    }
}

/// Waits for `task` to settle.
#[must_use]
pub fn join(task: &TaskHandle) -> Effect {
    Effect::Join { task: task.clone() }
}

/// Cancels `task` and its subtree.
#[must_use]
pub fn cancel(task: &TaskHandle) -> Effect {
    cancel_with(task, CancelReason::user("cancel effect"))
}

/// Cancels `task` and its subtree with an explicit reason.
#[must_use]
pub fn cancel_with(task: &TaskHandle, reason: CancelReason) -> Effect {
    Effect::Cancel {
        task: task.clone(),
        reason,
    }
}

/// Races labeled effects.
#[must_use]
pub fn race<I, L>(effects: I) -> Effect
where
    I: IntoIterator<Item = (L, Effect)>,
    L: Into<String>,
{
    Effect::Race {
        effects: labeled(effects),
    }
}

/// Runs labeled effects concurrently and waits for all of them.
#[must_use]
pub fn all<I, L>(effects: I) -> Effect
where
    I: IntoIterator<Item = (L, Effect)>,
    L: Into<String>,
{
    Effect::All {
        effects: labeled(effects),
    }
}

/// Sleeps for `ms` milliseconds.
#[must_use]
pub fn delay(ms: u64) -> Effect {
    sleep(Duration::from_millis(ms))
}

/// Sleeps for `duration`.
#[must_use]
pub fn sleep(duration: Duration) -> Effect {
    Effect::Delay { duration }
}
