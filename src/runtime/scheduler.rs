//! The effect interpreter.
//!
//! One pass of the loop does the first applicable step of:
//!
//! 1. drain the remote inbox and waker wakeups
//! 2. evaluate `race`/`all` groups whose branches settled
//! 3. poll the next ready task
//! 4. deliver the next queued action
//! 5. fire due timers
//!
//! Polling a task runs its saga to the next effect. Effects that resolve
//! without waiting (fork, cancel, immediate channel operations, join of a
//! settled task) fill the slot and poll again at once, so a saga only yields
//! the loop when it actually has to wait.
//!
//! The state `RefCell` is never borrowed across user code.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::Value;

use crate::bus::{match_takers, Listener};
use crate::channel::{Channel, ChannelItem, PutOutcome, TakeOutcome};
use crate::combinator::{check_labels, Group, GroupKind, Verdict};
use crate::cx::Cx;
use crate::effect::{Callable, ChannelOp, Effect, Labeled, Resume, Saga, TakeSource, TaskFuture};
use crate::error::{Error, ErrorKind, Result};
use crate::lifecycle;
use crate::record::finalizer::{Cleanup, FinalizerStack};
use crate::record::task::{TaskKind, TaskRecord, Wait};
use crate::record::watcher::WatcherInfo;
use crate::runtime::config::{RuntimeConfig, TimeMode, UnhandledError};
use crate::runtime::state::{RuntimeState, RuntimeStats};
use crate::runtime::task_handle::TaskCell;
use crate::runtime::waker::{WakeKey, WakerState};
use crate::runtime::TaskHandle;
use crate::time::{Clock, VirtualClock, WallClock};
use crate::tracing_compat::{debug, error, trace, warn};
use crate::types::{Action, CancelReason, Outcome, SubscriptionId, TaskId, Time};

/// How an effect resolved.
enum Step {
    /// Resume the saga with this now.
    Ready(Result<Resume>),
    /// The task is parked; something else will fill its slot.
    Suspended,
}

/// Resets the re-entrancy flag when a driver call returns.
struct RunGuard<'a>(&'a Cell<bool>);

impl<'a> RunGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Option<Self> {
        if flag.replace(true) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub(crate) struct RuntimeInner {
    pub(crate) config: RuntimeConfig,
    pub(crate) state: RefCell<RuntimeState>,
    pub(crate) wakers: Arc<WakerState>,
    clock: Clock,
    running: Cell<bool>,
    /// Polls made by the current driver call.
    run_steps: Cell<u64>,
}

impl RuntimeInner {
    pub(crate) fn new(config: RuntimeConfig) -> Self {
        let clock = match config.time_mode {
            TimeMode::Virtual => Clock::Virtual(VirtualClock::new()),
            TimeMode::Wall => Clock::Wall(WallClock::new()),
        };
        Self {
            state: RefCell::new(RuntimeState::new(config.max_watchers)),
            wakers: Arc::new(WakerState::new()),
            clock,
            running: Cell::new(false),
            run_steps: Cell::new(0),
            config,
        }
    }

    pub(crate) fn now(&self) -> Time {
        self.clock.now()
    }

    pub(crate) fn virtual_clock(&self) -> Option<&VirtualClock> {
        self.clock.as_virtual()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.get()
    }

    pub(crate) fn stats(&self) -> RuntimeStats {
        self.state.borrow().stats
    }

    // ------------------------------------------------------------------
    // Spawning
    // ------------------------------------------------------------------

    /// Creates a task and queues it. `start` builds the future from the
    /// task's context.
    fn spawn_task<F>(
        self: &Rc<Self>,
        parent: Option<TaskId>,
        kind: TaskKind,
        name: Rc<str>,
        observed: bool,
        start: F,
    ) -> TaskHandle
    where
        F: FnOnce(Cx) -> TaskFuture,
    {
        let (id, cell, slot) = {
            let mut guard = self.state.borrow_mut();
            let st = &mut *guard;
            let id = st.next_task_id();
            let cell = Rc::new(TaskCell::new(id));
            let mut record = TaskRecord::new(id, parent, kind, name, Rc::clone(&cell));
            record.observed = observed;
            let slot = Rc::clone(&record.slot);
            if let Some(p) = parent.and_then(|p| st.tasks.get_mut(&p)) {
                p.children.push(id);
            }
            debug!(
                task = %id,
                parent = ?parent,
                kind = %record.kind,
                saga = %record.name,
                "task spawned"
            );
            st.tasks.insert(id, record);
            st.stats.tasks_spawned += 1;
            (id, cell, slot)
        };

        let cx = Cx::new(id, slot, Rc::clone(&cell), Rc::downgrade(self));
        match catch_unwind(AssertUnwindSafe(|| start(cx))) {
            Ok(future) => {
                let mut guard = self.state.borrow_mut();
                let st = &mut *guard;
                if let Some(rec) = st.tasks.get_mut(&id) {
                    rec.future = Some(future);
                    st.ready.push_back(id);
                }
            }
            Err(payload) => {
                let err = Error::panicked(&*payload).in_task(id);
                self.settle(id, Outcome::Err(err));
            }
        }
        TaskHandle::new(cell)
    }

    pub(crate) fn spawn_saga(
        self: &Rc<Self>,
        parent: Option<TaskId>,
        kind: TaskKind,
        saga: &Saga,
        args: Vec<Value>,
        observed: bool,
    ) -> TaskHandle {
        let saga = saga.clone();
        self.spawn_task(parent, kind, saga.name_rc(), observed, move |cx| {
            let body = saga.start(cx, args);
            Box::pin(async move { body.await.map(Resume::Value) })
        })
    }

    fn spawn_branch(self: &Rc<Self>, owner: TaskId, label: &str, effect: Effect) -> TaskHandle {
        let label: Rc<str> = Rc::from(label);
        self.spawn_task(
            Some(owner),
            TaskKind::Branch(Rc::clone(&label)),
            label,
            true,
            move |cx| Box::pin(async move { cx.run(effect).await }),
        )
    }

    // ------------------------------------------------------------------
    // Driving
    // ------------------------------------------------------------------

    fn budget_exhausted(&self) -> bool {
        self.config
            .max_steps_per_run
            .is_some_and(|limit| self.run_steps.get() >= limit)
    }

    fn count_step(&self) {
        self.run_steps.set(self.run_steps.get() + 1);
        self.state.borrow_mut().stats.steps += 1;
    }

    /// Polls one task until it parks, settles, or the step budget runs out.
    fn drive(self: &Rc<Self>, id: TaskId) {
        let (mut future, slot) = {
            let mut st = self.state.borrow_mut();
            let Some(rec) = st.tasks.get_mut(&id) else {
                return;
            };
            if rec.is_terminal() {
                debug_assert!(rec.future.is_none(), "settled task {id} still holds its future");
                return;
            }
            let Some(future) = rec.future.take() else {
                return;
            };
            if rec.start_running() {
                trace!(task = %id, "task running");
            }
            (future, Rc::clone(&rec.slot))
        };
        let waker = self.wakers.waker_for(WakeKey::Task(id));
        let mut cx = Context::from_waker(&waker);

        loop {
            let polled = catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));
            self.count_step();
            let effect = match polled {
                Err(payload) => {
                    drop(future);
                    self.settle(id, Outcome::Err(Error::panicked(&*payload).in_task(id)));
                    return;
                }
                Ok(Poll::Ready(result)) => {
                    drop(future);
                    let outcome = match result {
                        Ok(value) => Outcome::Ok(value),
                        Err(e) => Outcome::Err(e.in_task(id)),
                    };
                    self.settle(id, outcome);
                    return;
                }
                Ok(Poll::Pending) => slot.take_request(),
            };
            let Some(effect) = effect else {
                self.park(id, future, Some(Wait::External));
                return;
            };

            trace!(task = %id, effect = effect.name(), "resolving effect");
            let step = self.resolve(id, effect);
            if self.is_terminal(id) {
                // The effect cancelled this task or an ancestor.
                drop(future);
                return;
            }
            match step {
                Step::Ready(result) => {
                    slot.fill(result);
                    if self.budget_exhausted() {
                        self.park(id, future, None);
                        self.state.borrow_mut().ready.push_back(id);
                        return;
                    }
                }
                Step::Suspended => {
                    self.park(id, future, None);
                    return;
                }
            }
        }
    }

    /// Puts a polled future back on its record.
    fn park(&self, id: TaskId, future: TaskFuture, wait: Option<Wait>) {
        let mut st = self.state.borrow_mut();
        match st.tasks.get_mut(&id) {
            Some(rec) if !rec.is_terminal() => {
                rec.future = Some(future);
                if let Some(wait) = wait {
                    rec.wait = wait;
                }
            }
            _ => {
                drop(st);
                drop(future);
            }
        }
    }

    fn is_terminal(&self, id: TaskId) -> bool {
        self.state
            .borrow()
            .tasks
            .get(&id)
            .map_or(true, TaskRecord::is_terminal)
    }

    /// Delivers `result` to a parked task and queues it.
    fn resume(&self, id: TaskId, result: Result<Resume>) {
        let old = {
            let mut guard = self.state.borrow_mut();
            let st = &mut *guard;
            let Some(rec) = st.tasks.get_mut(&id) else {
                return;
            };
            if rec.is_terminal() {
                return;
            }
            let old = std::mem::take(&mut rec.wait);
            rec.slot.fill(result);
            st.ready.push_back(id);
            old
        };
        drop(old);
    }

    fn set_wait(&self, id: TaskId, wait: Wait) {
        if let Some(rec) = self.state.borrow_mut().tasks.get_mut(&id) {
            rec.wait = wait;
        }
    }

    // ------------------------------------------------------------------
    // Effect resolution
    // ------------------------------------------------------------------

    fn resolve(self: &Rc<Self>, id: TaskId, effect: Effect) -> Step {
        match effect {
            Effect::Call { callable, args } => self.resolve_call(id, &callable, args),
            Effect::CallSaga { saga, args } => {
                let child = self.spawn_saga(Some(id), TaskKind::Fork, &saga, args, true);
                self.resolve_join(id, &child)
            }
            Effect::Put { action } => {
                let mut st = self.state.borrow_mut();
                st.bus.enqueue(action, Some(id));
                if let Some(rec) = st.tasks.get_mut(&id) {
                    rec.wait = Wait::Put;
                }
                Step::Suspended
            }
            Effect::Take {
                source: TakeSource::Pattern(pattern),
            } => {
                let mut st = self.state.borrow_mut();
                st.bus.add_taker(id, pattern);
                if let Some(rec) = st.tasks.get_mut(&id) {
                    rec.wait = Wait::Take;
                }
                Step::Suspended
            }
            Effect::Take {
                source: TakeSource::Channel(channel),
            }
            | Effect::Channel {
                channel,
                op: ChannelOp::Take,
            } => self.resolve_channel_take(id, channel),
            Effect::Channel {
                channel,
                op: ChannelOp::Put(value),
            } => self.resolve_channel_put(id, channel, value),
            Effect::Channel {
                channel,
                op: ChannelOp::Close,
            } => {
                self.close(&channel);
                Step::Ready(Ok(Resume::Unit))
            }
            Effect::Fork {
                saga,
                args,
                detached,
            } => {
                let (parent, kind) = if detached {
                    (None, TaskKind::Detached)
                } else {
                    (Some(id), TaskKind::Fork)
                };
                let handle = self.spawn_saga(parent, kind, &saga, args, false);
                Step::Ready(Ok(Resume::Task(handle)))
            }
            Effect::Join { task } => self.resolve_join(id, &task),
            Effect::Cancel { task, reason } => {
                self.cancel_tree(task.id(), reason);
                Step::Ready(Ok(Resume::Unit))
            }
            Effect::Race { effects } => self.resolve_group(id, GroupKind::Race, effects),
            Effect::All { effects } => self.resolve_group(id, GroupKind::All, effects),
            Effect::Delay { duration } => {
                let deadline = self.now() + duration;
                let mut st = self.state.borrow_mut();
                let seq = st.timers.insert(id, deadline);
                if let Some(rec) = st.tasks.get_mut(&id) {
                    rec.wait = Wait::Timer(seq);
                }
                Step::Suspended
            }
        }
    }

    fn resolve_call(&self, id: TaskId, callable: &Callable, args: Vec<Value>) -> Step {
        let waker = self.wakers.waker_for(WakeKey::Call(id));
        let mut cx = Context::from_waker(&waker);
        let polled = catch_unwind(AssertUnwindSafe(|| {
            let mut future = callable.invoke(args);
            let poll = future.as_mut().poll(&mut cx);
            (future, poll)
        }));
        match polled {
            Ok((_, Poll::Ready(result))) => Step::Ready(call_result(id, callable.name(), result)),
            Ok((future, Poll::Pending)) => {
                self.set_wait(
                    id,
                    Wait::Call {
                        name: callable.name_rc(),
                        future,
                    },
                );
                Step::Suspended
            }
            Err(payload) => Step::Ready(call_result(
                id,
                callable.name(),
                Err(Error::panicked(&*payload)),
            )),
        }
    }

    /// Re-polls an in-flight callable after its waker fired.
    fn poll_call(&self, id: TaskId) {
        let (name, mut future) = {
            let mut st = self.state.borrow_mut();
            let Some(rec) = st.tasks.get_mut(&id) else {
                return;
            };
            match std::mem::take(&mut rec.wait) {
                Wait::Call { name, future } => (name, future),
                other => {
                    rec.wait = other;
                    return;
                }
            }
        };
        let waker = self.wakers.waker_for(WakeKey::Call(id));
        let mut cx = Context::from_waker(&waker);
        match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Ready(result)) => {
                drop(future);
                self.resume(id, call_result(id, &name, result));
            }
            Ok(Poll::Pending) => {
                let mut st = self.state.borrow_mut();
                match st.tasks.get_mut(&id) {
                    Some(rec) if !rec.is_terminal() && rec.wait.is_idle() => {
                        rec.wait = Wait::Call { name, future };
                    }
                    _ => {
                        drop(st);
                        drop(future);
                    }
                }
            }
            Err(payload) => {
                drop(future);
                let err = Err(Error::panicked(&*payload));
                self.resume(id, call_result(id, &name, err));
            }
        }
    }

    fn resolve_channel_take(&self, id: TaskId, channel: Channel) -> Step {
        match channel.take(id) {
            TakeOutcome::Ready { item, unblocked } => {
                if let Some(putter) = unblocked {
                    self.resume(putter, Ok(Resume::Unit));
                }
                Step::Ready(Ok(Resume::Item(item)))
            }
            TakeOutcome::Parked => {
                self.set_wait(id, Wait::Channel(channel));
                Step::Suspended
            }
        }
    }

    fn resolve_channel_put(&self, id: TaskId, channel: Channel, value: Value) -> Step {
        match channel.put(Some(id), value) {
            Err(e) => Step::Ready(Err(e.in_task(id))),
            Ok(PutOutcome::Handoff(taker, value)) => {
                self.resume(taker, Ok(Resume::Item(ChannelItem::Item(value))));
                Step::Ready(Ok(Resume::Unit))
            }
            Ok(PutOutcome::Accepted) => Step::Ready(Ok(Resume::Unit)),
            Ok(PutOutcome::Parked) => {
                self.set_wait(id, Wait::Channel(channel));
                Step::Suspended
            }
            Ok(PutOutcome::Full) => Step::Ready(Err(Error::new(ErrorKind::ChannelFull))),
        }
    }

    fn close(&self, channel: &Channel) {
        let released = channel.close();
        trace!(
            channel = %channel.id(),
            takers = released.takers.len(),
            putters = released.putters.len(),
            "channel closed"
        );
        for taker in released.takers {
            self.resume(taker, Ok(Resume::Item(ChannelItem::Closed)));
        }
        for putter in released.putters {
            self.resume(putter, Err(Error::channel_closed().in_task(putter)));
        }
    }

    fn resolve_join(&self, id: TaskId, target: &TaskHandle) -> Step {
        if let Some(outcome) = target.outcome() {
            return Step::Ready(outcome.into_result());
        }
        if target.id() == id {
            return Step::Ready(Err(Error::invalid_argument("a task cannot join itself")));
        }
        let mut st = self.state.borrow_mut();
        let Some(rec) = st.tasks.get_mut(&target.id()) else {
            return Step::Ready(Err(Error::invalid_argument(format!(
                "task {} does not belong to this runtime",
                target.id()
            ))));
        };
        rec.joiners.push(id);
        rec.observed = true;
        if let Some(me) = st.tasks.get_mut(&id) {
            me.wait = Wait::Join(target.id());
        }
        Step::Suspended
    }

    fn resolve_group(self: &Rc<Self>, id: TaskId, kind: GroupKind, effects: Labeled) -> Step {
        if let Err(e) = check_labels(&effects) {
            return Step::Ready(Err(e));
        }
        if effects.is_empty() {
            return match kind {
                GroupKind::Race => {
                    Step::Ready(Err(Error::invalid_argument("race needs at least one branch")))
                }
                GroupKind::All => Step::Ready(Ok(Resume::All(Default::default()))),
            };
        }
        let branches: Vec<(String, TaskHandle)> = effects
            .into_iter()
            .map(|(label, effect)| {
                let handle = self.spawn_branch(id, &label, effect);
                (label, handle)
            })
            .collect();

        let mut guard = self.state.borrow_mut();
        let st = &mut *guard;
        let gid = st.next_group_id();
        for (_, handle) in &branches {
            if let Some(rec) = st.tasks.get_mut(&handle.id()) {
                rec.group = Some(gid);
            }
            // A branch that settled while spawning still needs evaluating.
            if handle.is_terminal() {
                st.mark_dirty(gid);
            }
        }
        st.groups.insert(
            gid,
            Group {
                kind,
                owner: id,
                branches,
            },
        );
        if let Some(rec) = st.tasks.get_mut(&id) {
            rec.wait = Wait::Group(gid);
        }
        Step::Suspended
    }

    // ------------------------------------------------------------------
    // Settlement and cancellation
    // ------------------------------------------------------------------

    fn run_cleanup(&self, id: TaskId, mut handlers: FinalizerStack) {
        if !handlers.is_empty() {
            trace!(task = %id, handlers = handlers.len(), "running cleanup");
        }
        while let Some(handler) = handlers.pop() {
            if catch_unwind(AssertUnwindSafe(handler)).is_err() {
                error!(task = %id, "cleanup handler panicked");
            }
        }
    }

    pub(crate) fn push_cleanup(&self, id: TaskId, handler: Cleanup) {
        let rejected = {
            let mut st = self.state.borrow_mut();
            match st.tasks.get_mut(&id) {
                Some(rec) if !rec.is_terminal() => {
                    rec.cleanup.push(handler);
                    None
                }
                _ => Some(handler),
            }
        };
        // Registered after settlement: run it now.
        if let Some(handler) = rejected {
            let mut late = FinalizerStack::new();
            late.push(handler);
            self.run_cleanup(id, late);
        }
    }

    /// Settles a task that finished on its own.
    fn settle(&self, id: TaskId, outcome: Outcome<Resume>) {
        let (cleanup, wait) = {
            let mut st = self.state.borrow_mut();
            let Some(rec) = st.tasks.get_mut(&id) else {
                return;
            };
            if rec.is_terminal() {
                return;
            }
            (rec.cleanup.take(), std::mem::take(&mut rec.wait))
        };
        drop(wait);
        self.run_cleanup(id, cleanup);
        self.finalize(id, outcome);
    }

    /// Records the outcome, wakes joiners, reports unhandled errors, reaps.
    fn finalize(&self, id: TaskId, outcome: Outcome<Resume>) {
        let (joiners, report) = {
            let mut guard = self.state.borrow_mut();
            let st = &mut *guard;
            let Some(rec) = st.tasks.get_mut(&id) else {
                return;
            };
            if rec.is_terminal() {
                return;
            }
            let report = match &outcome {
                Outcome::Err(error)
                    if rec.joiners.is_empty() && !rec.observed && rec.kind.reports_errors() =>
                {
                    Some(UnhandledError {
                        task: id,
                        origin: rec.kind.to_string(),
                        saga: rec.name.to_string(),
                        error: error.clone(),
                    })
                }
                _ => None,
            };
            match &outcome {
                Outcome::Ok(_) => st.stats.tasks_completed += 1,
                Outcome::Err(_) => st.stats.tasks_errored += 1,
                Outcome::Cancelled(_) => st.stats.tasks_cancelled += 1,
            }
            rec.cell.settle(outcome);
            debug!(task = %id, status = %rec.status(), "task settled");
            let joiners = std::mem::take(&mut rec.joiners);
            if let Some(group) = rec.group {
                st.mark_dirty(group);
            }
            (joiners, report)
        };

        if !joiners.is_empty() {
            let outcome = self.task_outcome(id);
            for joiner in joiners {
                let result = outcome.clone().map_or_else(
                    || Err(Error::internal("joined task has no outcome")),
                    Outcome::into_result,
                );
                self.resume(joiner, result);
            }
        }
        if let Some(report) = report {
            self.config.report_unhandled(&report);
        }
        self.try_reap(id);
    }

    fn task_outcome(&self, id: TaskId) -> Option<Outcome<Resume>> {
        self.state
            .borrow()
            .tasks
            .get(&id)
            .and_then(|r| r.cell.outcome())
    }

    /// Cancels `id` and its subtree. Children settle first, depth-first.
    ///
    /// A settled task whose children are still live passes the cancellation
    /// down to them.
    pub(crate) fn cancel_tree(&self, id: TaskId, reason: CancelReason) {
        let children: Vec<TaskId> = match self.state.borrow().tasks.get(&id) {
            Some(rec) => rec.children.to_vec(),
            None => return,
        };
        for child in children {
            self.cancel_tree(child, CancelReason::parent_cancelled());
        }
        self.cancel_one(id, reason);
    }

    fn cancel_one(&self, id: TaskId, reason: CancelReason) {
        let (future, wait, cleanup) = {
            let mut guard = self.state.borrow_mut();
            let st = &mut *guard;
            let Some(rec) = st.tasks.get_mut(&id) else {
                return;
            };
            if rec.is_terminal() || !rec.request_cancel(reason) {
                return;
            }
            let future = rec.future.take();
            let wait = std::mem::take(&mut rec.wait);
            let cleanup = rec.cleanup.take();
            detach(st, id, &wait);
            (future, wait, cleanup)
        };
        debug!(task = %id, wait = ?wait, "cancelling task");
        drop(wait);
        drop(future);
        self.run_cleanup(id, cleanup);
        let reason = self
            .state
            .borrow()
            .tasks
            .get(&id)
            .and_then(|r| r.cancelling.clone())
            .unwrap_or_default();
        self.finalize(id, Outcome::Cancelled(reason));
    }

    fn try_reap(&self, id: TaskId) {
        if !self.config.auto_reap {
            return;
        }
        let mut reaped = Vec::new();
        {
            let mut st = self.state.borrow_mut();
            let mut next = Some(id);
            while let Some(current) = next {
                match st.remove_if_reapable(current) {
                    Some((record, parent)) => {
                        reaped.push(record);
                        next = parent;
                    }
                    None => break,
                }
            }
        }
        if !reaped.is_empty() {
            trace!(task = %id, reaped = reaped.len(), "reaped settled tasks");
        }
        drop(reaped);
    }

    pub(crate) fn reap_settled(&self) -> usize {
        let mut reaped = Vec::new();
        {
            let mut st = self.state.borrow_mut();
            loop {
                let candidates: Vec<TaskId> = st
                    .tasks
                    .values()
                    .filter(|r| r.is_terminal() && r.children.is_empty())
                    .map(|r| r.id)
                    .collect();
                if candidates.is_empty() {
                    break;
                }
                for id in candidates {
                    if let Some((record, _)) = st.remove_if_reapable(id) {
                        reaped.push(record);
                    }
                }
            }
        }
        let count = reaped.len();
        drop(reaped);
        count
    }

    // ------------------------------------------------------------------
    // Loop
    // ------------------------------------------------------------------

    /// Runs until nothing can make progress without new input or time.
    ///
    /// Returns the number of saga polls made. A call while another driver
    /// call is on the stack returns `Ok(0)`; the outer call picks up the work.
    pub(crate) fn run_until_stalled(self: &Rc<Self>) -> Result<usize> {
        let Some(_guard) = RunGuard::enter(&self.running) else {
            return Ok(0);
        };
        self.run_steps.set(0);
        loop {
            if self.budget_exhausted() {
                let steps = self.run_steps.get();
                warn!(steps, "step limit exceeded, runtime did not stall");
                return Err(Error::new(ErrorKind::StepLimitExceeded)
                    .with_message(format!("no stall after {steps} steps")));
            }
            self.pump_external();
            // A branch settled by the last poll decides its group before
            // anything else runs.
            if self.eval_groups() {
                continue;
            }
            let next = self.state.borrow_mut().ready.pop_front();
            if let Some(id) = next {
                self.drive(id);
                continue;
            }
            if self.deliver_next() || self.fire_timers() {
                continue;
            }
            break;
        }
        usize::try_from(self.run_steps.get())
            .map_err(|_| Error::internal("step count overflow"))
    }

    /// Entry-point helper: run to stall, logging instead of failing.
    pub(crate) fn pump(self: &Rc<Self>) {
        if let Err(e) = self.run_until_stalled() {
            debug!(error = %e, "driver stopped early");
        }
    }

    fn pump_external(&self) {
        let inbox = self.wakers.drain_inbox();
        if !inbox.is_empty() {
            let mut st = self.state.borrow_mut();
            for action in inbox {
                st.bus.enqueue(action, None);
            }
        }
        for key in self.wakers.drain_woken() {
            match key {
                WakeKey::Task(id) => {
                    let mut guard = self.state.borrow_mut();
                    let st = &mut *guard;
                    if let Some(rec) = st.tasks.get_mut(&id) {
                        if matches!(rec.wait, Wait::External) {
                            rec.wait = Wait::Idle;
                            st.ready.push_back(id);
                        }
                    }
                }
                WakeKey::Call(id) => self.poll_call(id),
            }
        }
    }

    fn eval_groups(&self) -> bool {
        let dirty = std::mem::take(&mut self.state.borrow_mut().dirty_groups);
        if dirty.is_empty() {
            return false;
        }
        for gid in dirty {
            let decided = {
                let mut st = self.state.borrow_mut();
                let verdict = match st.groups.get(&gid) {
                    Some(group) => group.evaluate(),
                    None => continue,
                };
                match verdict {
                    Verdict::Pending => None,
                    Verdict::Settled {
                        result,
                        losers,
                        reason,
                    } => st
                        .groups
                        .remove(&gid)
                        .map(|group| (group.owner, result, losers, reason)),
                }
            };
            let Some((owner, result, losers, reason)) = decided else {
                continue;
            };
            for loser in losers {
                self.cancel_tree(loser, reason.clone());
            }
            self.resume(owner, result);
        }
        true
    }

    fn deliver_next(&self) -> bool {
        let (queued, takers) = {
            let mut st = self.state.borrow_mut();
            let Some(queued) = st.bus.pop_queued() else {
                return false;
            };
            let takers = st.bus.take_takers();
            (queued, takers)
        };
        let action = queued.action;
        lifecycle!(
            self.config.debug,
            action = %action.action_type,
            takers = takers.len(),
            "dispatching action"
        );
        let (matched, rest) = match_takers(takers, &action);
        let subscribers: Vec<Listener> = {
            let mut st = self.state.borrow_mut();
            st.bus.restore_takers(rest);
            st.stats.actions_dispatched += 1;
            st.bus.subscribers()
        };
        for taker in matched {
            self.resume(taker, Ok(Resume::Action(action.clone())));
        }
        for listener in subscribers {
            if catch_unwind(AssertUnwindSafe(|| listener(&action))).is_err() {
                error!(action = %action.action_type, "subscriber panicked");
            }
        }
        if let Some(putter) = queued.putter {
            self.resume(putter, Ok(Resume::Unit));
        }
        true
    }

    fn fire_timers(&self) -> bool {
        let now = self.now();
        let due = self.state.borrow_mut().timers.pop_expired(now);
        if due.is_empty() {
            return false;
        }
        for (seq, task) in due {
            let waiting = self
                .state
                .borrow()
                .tasks
                .get(&task)
                .is_some_and(|r| matches!(r.wait, Wait::Timer(s) if s == seq));
            if waiting {
                self.resume(task, Ok(Resume::Unit));
            }
        }
        true
    }

    pub(crate) fn next_deadline(&self) -> Option<Time> {
        self.state.borrow().timers.peek_deadline()
    }

    /// Tasks parked on a callable or a foreign future.
    pub(crate) fn has_external_waits(&self) -> bool {
        self.state
            .borrow()
            .tasks
            .values()
            .any(|r| matches!(r.wait, Wait::Call { .. } | Wait::External))
    }

    // ------------------------------------------------------------------
    // Entry points used by `Runtime`
    // ------------------------------------------------------------------

    pub(crate) fn dispatch(self: &Rc<Self>, action: Action) {
        self.state.borrow_mut().bus.enqueue(action, None);
        self.pump();
    }

    pub(crate) fn subscribe(&self, listener: Listener) -> SubscriptionId {
        self.state.borrow_mut().bus.subscribe(listener)
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.state.borrow_mut().bus.unsubscribe(id)
    }

    pub(crate) fn register(
        self: &Rc<Self>,
        name: &str,
        saga: &Saga,
        args: Vec<Value>,
    ) -> Result<TaskHandle> {
        self.state.borrow().registry.check_available(name)?;
        let root = self.spawn_saga(None, TaskKind::Watcher(Rc::from(name)), saga, args, false);
        let info = WatcherInfo {
            name: name.to_string(),
            root: root.clone(),
            created_at: self.now(),
        };
        self.state.borrow_mut().registry.insert(info);
        lifecycle!(
            self.config.debug,
            watcher = %name,
            task = %root.id(),
            saga = saga.name(),
            "watcher registered"
        );
        self.pump();
        Ok(root)
    }

    pub(crate) fn unregister(self: &Rc<Self>, name: &str) {
        let removed = self.state.borrow_mut().registry.remove(name);
        let Some(info) = removed else {
            return;
        };
        self.cancel_tree(info.root.id(), CancelReason::shutdown("watcher unregistered"));
        lifecycle!(
            self.config.debug,
            watcher = %name,
            task = %info.root.id(),
            "watcher unregistered"
        );
        self.pump();
    }

    pub(crate) fn unregister_all(self: &Rc<Self>) {
        let names = self.state.borrow().registry.names();
        for name in names {
            self.unregister(&name);
        }
    }

    pub(crate) fn cancel_all_tasks(self: &Rc<Self>) {
        self.unregister_all();
        let roots = self.state.borrow().roots();
        for root in roots {
            self.cancel_tree(root, CancelReason::shutdown("cancel_all_tasks"));
        }
        self.pump();
    }

    pub(crate) fn put_channel(self: &Rc<Self>, channel: &Channel, value: Value) -> Result<()> {
        match channel.put(None, value)? {
            PutOutcome::Handoff(taker, value) => {
                self.resume(taker, Ok(Resume::Item(ChannelItem::Item(value))));
            }
            PutOutcome::Accepted => {}
            PutOutcome::Full | PutOutcome::Parked => {
                return Err(Error::new(ErrorKind::ChannelFull)
                    .with_message(format!("channel {} is full", channel.id())));
            }
        }
        self.pump();
        Ok(())
    }

    pub(crate) fn close_channel(self: &Rc<Self>, channel: &Channel) {
        self.close(channel);
        self.pump();
    }

    pub(crate) fn cancel(self: &Rc<Self>, task: &TaskHandle, reason: CancelReason) {
        self.cancel_tree(task.id(), reason);
        self.pump();
    }
}

impl std::fmt::Debug for RuntimeInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeInner")
            .field("config", &self.config)
            .field("now", &self.now())
            .field("running", &self.running.get())
            .finish_non_exhaustive()
    }
}

/// Unhooks a cancelled task from whatever would have resumed it.
fn detach(st: &mut RuntimeState, id: TaskId, wait: &Wait) {
    match wait {
        Wait::Take => st.bus.remove_taker(id),
        Wait::Put => st.bus.drop_put(id),
        Wait::Channel(channel) => channel.remove_waiter(id),
        Wait::Timer(seq) => st.timers.cancel(*seq),
        Wait::Join(target) => {
            if let Some(rec) = st.tasks.get_mut(target) {
                rec.joiners.retain(|j| *j != id);
            }
        }
        Wait::Group(gid) => {
            st.groups.remove(gid);
        }
        Wait::Call { .. } | Wait::External | Wait::Idle => {}
    }
}

fn call_result(id: TaskId, name: &str, result: Result<Value>) -> Result<Resume> {
    result
        .map(Resume::Value)
        .map_err(|e| Error::effect_resolution(name, e).in_task(id))
}
