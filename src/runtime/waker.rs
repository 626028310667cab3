//! Waker implementation with deduplication, plus the remote action inbox.
//!
//! The runtime itself is single-threaded, but wakers and the
//! [`RemoteDispatcher`](super::RemoteDispatcher) may be used from any thread,
//! so this is the one piece of shared state guarded by a lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::task::{Wake, Waker};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::types::{Action, TaskId};

/// What a waker wakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WakeKey {
    /// A saga parked on a foreign future.
    Task(TaskId),
    /// The in-flight callable of a task parked on a `call`.
    Call(TaskId),
}

#[derive(Debug, Default)]
struct Pending {
    woken: Vec<WakeKey>,
    inbox: VecDeque<Action>,
}

impl Pending {
    fn has_work(&self) -> bool {
        !self.woken.is_empty() || !self.inbox.is_empty()
    }
}

/// Shared state for wakers and remote dispatch.
#[derive(Debug, Default)]
pub(crate) struct WakerState {
    pending: Mutex<Pending>,
    signal: Condvar,
}

impl WakerState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Creates a waker for a specific key.
    pub(crate) fn waker_for(self: &Arc<Self>, key: WakeKey) -> Waker {
        Waker::from(Arc::new(KeyWaker {
            state: Arc::clone(self),
            key,
        }))
    }

    /// Drains all woken keys, in wake order.
    pub(crate) fn drain_woken(&self) -> Vec<WakeKey> {
        std::mem::take(&mut self.pending.lock().woken)
    }

    /// Drains the remote inbox, in arrival order.
    pub(crate) fn drain_inbox(&self) -> Vec<Action> {
        self.pending.lock().inbox.drain(..).collect()
    }

    pub(crate) fn has_work(&self) -> bool {
        self.pending.lock().has_work()
    }

    pub(crate) fn push_remote(&self, action: Action) {
        self.pending.lock().inbox.push_back(action);
        self.signal.notify_one();
    }

    /// Blocks until a wake or remote action arrives, or `timeout` elapses.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock();
        if pending.has_work() {
            return true;
        }
        let _ = self.signal.wait_for(&mut pending, timeout);
        pending.has_work()
    }

    fn wake(&self, key: WakeKey) {
        let mut pending = self.pending.lock();
        if !pending.woken.contains(&key) {
            pending.woken.push(key);
        }
        drop(pending);
        self.signal.notify_one();
    }
}

/// A waker for one key.
struct KeyWaker {
    state: Arc<WakerState>,
    key: WakeKey,
}

impl Wake for KeyWaker {
    fn wake(self: Arc<Self>) {
        self.state.wake(self.key);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.state.wake(self.key);
    }
}
