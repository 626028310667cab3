//! The saga runtime.
//!
//! - [`config`]: Runtime configuration and the unhandled-error hook
//! - [`builder`]: Fluent builder resolving config from code, env and TOML
//! - [`env_config`]: `SIDEFX_*` environment variables and the TOML schema
//! - [`state`]: Task table, bus, timers and counters
//! - [`task_handle`]: Handles for observing spawned tasks
//! - `scheduler`: The effect interpreter
//! - `timer`: Timer heap for `delay`
//! - `waker`: Wakers for external futures and the remote inbox
//!
//! # Quick Start
//!
//! ```
//! use sidefx::{effect, Runtime, RuntimeBuilder, Saga};
//! use serde_json::{json, Value};
//!
//! let rt = RuntimeBuilder::virtual_time().build().unwrap();
//! let saga = Saga::named("echo", |cx, _args| async move {
//!     let action = cx.take("PING").await?;
//!     Ok(json!(action.action_type))
//! });
//! let task = rt.register("echo", &saga, Vec::new()).unwrap();
//! rt.dispatch("PING");
//! assert_eq!(task.outcome().unwrap().into_result().unwrap().into_value().unwrap(), json!("PING"));
//! # let _ = (effect::delay(1), Value::Null, Runtime::new());
//! ```
//!
//! # Driving
//!
//! Every entry point that can unblock a saga (`dispatch`, `register`,
//! `cancel`, channel operations) runs the loop until it stalls before
//! returning. Timers only fire when the clock reaches them: call
//! [`Runtime::advance_time`] on the virtual clock, or
//! [`Runtime::run_until_quiescent`] to wait them out.

pub mod builder;
pub mod config;
pub mod env_config;
pub(crate) mod scheduler;
pub mod state;
pub mod task_handle;
pub(crate) mod timer;
pub(crate) mod waker;

pub use builder::RuntimeBuilder;
pub use config::{log_unhandled, ErrorHook, RuntimeConfig, TimeMode, UnhandledError};
pub use env_config::{
    ENV_AUTO_REAP, ENV_DEBUG, ENV_MAX_STEPS, ENV_MAX_WATCHERS, ENV_TIME_MODE,
};
pub use state::RuntimeStats;
pub use task_handle::TaskHandle;

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::bus::Subscription;
use crate::channel::Channel;
use crate::effect::Saga;
use crate::error::{Error, ErrorKind, Result};
use crate::record::task::{TaskKind, TaskStatus};
use crate::record::watcher::WatcherInfo;
use crate::tracing_compat::{debug, warn};
use crate::types::{Action, CancelReason, SubscriptionId, TaskId, Time};
use scheduler::RuntimeInner;
use waker::WakerState;

/// A single-threaded saga runtime.
///
/// Owns the task tree, the action bus, the watcher registry and the clock.
/// Not `Send`: drive it from the thread that created it and use
/// [`Runtime::remote`] to feed actions from other threads.
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Runtime with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Start a [`RuntimeBuilder`].
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Runtime with an already-resolved configuration.
    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        debug!(
            time_mode = %config.time_mode,
            max_watchers = config.max_watchers,
            "runtime created"
        );
        Self {
            inner: Rc::new(RuntimeInner::new(config)),
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // Bus
    // ------------------------------------------------------------------

    /// Queue an action and run until stalled.
    ///
    /// Actions dispatched while the loop is running (from a subscriber, for
    /// instance) are queued behind the current one.
    pub fn dispatch(&self, action: impl Into<Action>) {
        self.inner.dispatch(action.into());
    }

    /// Observe every delivered action, after matching takers are resumed.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Action) + 'static,
    {
        let id = self.inner.subscribe(Rc::new(listener));
        Subscription::new(id, Rc::downgrade(&self.inner))
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }

    /// A `Send + Sync` handle that queues actions from other threads.
    #[must_use]
    pub fn remote(&self) -> RemoteDispatcher {
        RemoteDispatcher {
            wakers: Arc::clone(&self.inner.wakers),
        }
    }

    /// Block until a remote action or a waker wakeup arrives.
    ///
    /// Returns false on timeout.
    pub fn wait_for_work(&self, timeout: Duration) -> bool {
        self.inner.wakers.wait(timeout)
    }

    // ------------------------------------------------------------------
    // Watchers
    // ------------------------------------------------------------------

    /// Start `saga` as a named root watcher.
    ///
    /// Fails with `DuplicateName` if `name` is taken and `WatcherLimit` if
    /// the registry is full.
    pub fn register(
        &self,
        name: impl AsRef<str>,
        saga: &Saga,
        args: Vec<Value>,
    ) -> Result<TaskHandle> {
        self.inner.register(name.as_ref(), saga, args)
    }

    /// Cancel a watcher's subtree and free its name. Unknown names are a no-op.
    pub fn unregister(&self, name: impl AsRef<str>) {
        self.inner.unregister(name.as_ref());
    }

    /// Unregister every watcher, in name order.
    pub fn unregister_all(&self) {
        self.inner.unregister_all();
    }

    /// Unregister every watcher, then cancel every other root task.
    pub fn cancel_all_tasks(&self) {
        self.inner.cancel_all_tasks();
    }

    /// Returns true if a watcher is registered under `name`.
    #[must_use]
    pub fn is_registered(&self, name: impl AsRef<str>) -> bool {
        self.inner.state.borrow().registry.contains(name.as_ref())
    }

    /// Registered watcher names, sorted.
    #[must_use]
    pub fn registered_names(&self) -> Vec<String> {
        self.inner.state.borrow().registry.names()
    }

    /// Details of one watcher.
    #[must_use]
    pub fn watcher_info(&self, name: impl AsRef<str>) -> Option<WatcherInfo> {
        self.inner.state.borrow().registry.get(name.as_ref()).cloned()
    }

    /// Details of every watcher, sorted by name.
    #[must_use]
    pub fn watchers(&self) -> Vec<WatcherInfo> {
        self.inner.state.borrow().registry.infos()
    }

    // ------------------------------------------------------------------
    // Tasks and channels
    // ------------------------------------------------------------------

    /// Start `saga` as an unnamed root task.
    pub fn fork(&self, saga: &Saga, args: Vec<Value>) -> TaskHandle {
        let handle = self.inner.spawn_saga(None, TaskKind::Root, saga, args, false);
        self.inner.pump();
        handle
    }

    /// Cancel a task and its subtree.
    pub fn cancel(&self, task: &TaskHandle) {
        self.inner.cancel(task, CancelReason::user("cancelled by runtime"));
    }

    /// Cancel a task with an explicit reason.
    pub fn cancel_with(&self, task: &TaskHandle, reason: CancelReason) {
        self.inner.cancel(task, reason);
    }

    /// Put onto a channel from outside any task.
    ///
    /// There is no task to park, so a put that would block fails with
    /// `ChannelFull` instead.
    pub fn put_channel(&self, channel: &Channel, value: impl Into<Value>) -> Result<()> {
        self.inner.put_channel(channel, value.into()).map_err(|e| {
            warn!(channel = %channel.id(), error = %e, "channel put failed");
            e
        })
    }

    /// Close a channel, releasing parked takers and putters.
    pub fn close_channel(&self, channel: &Channel) {
        self.inner.close_channel(channel);
    }

    // ------------------------------------------------------------------
    // Driving
    // ------------------------------------------------------------------

    /// Run until nothing can progress without new input or time.
    ///
    /// Returns the saga polls made. Fails with `StepLimitExceeded` if the
    /// configured limit is reached first; the remaining work stays queued.
    pub fn run_until_stalled(&self) -> Result<usize> {
        self.inner.run_until_stalled()
    }

    /// Run until no task can ever progress without new input.
    ///
    /// Waits out pending timers (advancing the virtual clock, or sleeping on
    /// the wall clock) and blocks on in-flight callables and remote actions.
    pub fn run_until_quiescent(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            total += self.inner.run_until_stalled()?;
            if let Some(deadline) = self.inner.next_deadline() {
                match self.inner.virtual_clock() {
                    Some(clock) => clock.advance_to(deadline),
                    None => {
                        let wait = deadline.duration_since(self.inner.now());
                        if !wait.is_zero() {
                            self.inner.wakers.wait(wait);
                        }
                    }
                }
                continue;
            }
            if self.inner.has_external_waits() || self.inner.wakers.has_work() {
                self.inner.wakers.wait(Duration::MAX);
                continue;
            }
            return Ok(total);
        }
    }

    /// Move the virtual clock forward by `duration`, firing timers in
    /// deadline order and running to a stall after each.
    ///
    /// Fails with `InvalidArgument` on the wall clock.
    pub fn advance_time(&self, duration: Duration) -> Result<usize> {
        let Some(clock) = self.inner.virtual_clock() else {
            return Err(Error::invalid_argument(
                "advance_time requires the virtual clock",
            ));
        };
        let target = self.inner.now() + duration;
        let mut total = self.inner.run_until_stalled()?;
        while let Some(deadline) = self.inner.next_deadline().filter(|d| *d <= target) {
            clock.advance_to(deadline);
            total += self.inner.run_until_stalled()?;
        }
        clock.advance_to(target);
        total += self.inner.run_until_stalled()?;
        Ok(total)
    }

    /// Run `saga` as a root task to completion and return its value.
    ///
    /// Drives the runtime with [`run_until_quiescent`](Self::run_until_quiescent).
    /// Fails with `Stalled` if the saga can never finish (it waits on an
    /// action nobody will dispatch, for instance).
    pub fn run_saga(&self, saga: &Saga, args: Vec<Value>) -> Result<Value> {
        if self.inner.is_running() {
            return Err(Error::invalid_argument(
                "run_saga called from inside the runtime",
            ));
        }
        let handle = self.inner.spawn_saga(None, TaskKind::Root, saga, args, true);
        self.run_until_quiescent()?;
        match handle.outcome() {
            Some(outcome) => outcome.into_result()?.into_value(),
            None => Err(Error::new(ErrorKind::Stalled).with_message(format!(
                "saga {} is still {} with no pending work",
                saga.name(),
                handle.status()
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Current clock reading.
    #[must_use]
    pub fn now(&self) -> Time {
        self.inner.now()
    }

    /// Counters since creation.
    #[must_use]
    pub fn stats(&self) -> RuntimeStats {
        self.inner.stats()
    }

    /// Tasks not yet settled.
    #[must_use]
    pub fn live_task_count(&self) -> usize {
        self.inner.state.borrow().live_task_count()
    }

    /// Records in the task table, settled but unreaped ones included.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.inner.state.borrow().tasks.len()
    }

    /// Status of a task still in the table.
    #[must_use]
    pub fn task_status(&self, id: TaskId) -> Option<TaskStatus> {
        self.inner.state.borrow().tasks.get(&id).map(|r| r.status())
    }

    /// Remove settled records with no live descendants. Returns how many.
    ///
    /// Only needed with `auto_reap` off.
    pub fn reap_settled(&self) -> usize {
        self.inner.reap_settled()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("inner", &self.inner)
            .finish()
    }
}

/// Queues actions into a [`Runtime`] from any thread.
///
/// Actions are picked up the next time the runtime drives its loop, in
/// arrival order, after local dispatches already queued.
#[derive(Clone)]
pub struct RemoteDispatcher {
    wakers: Arc<WakerState>,
}

impl RemoteDispatcher {
    /// Queue an action.
    pub fn dispatch(&self, action: impl Into<Action>) {
        self.wakers.push_remote(action.into());
    }
}

impl std::fmt::Debug for RemoteDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDispatcher").finish_non_exhaustive()
    }
}
