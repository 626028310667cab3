//! Buffered handoff queues between tasks.
//!
//! A [`Channel`] is built with [`channel`] and used from sagas through the
//! channel effects ([`take_channel`](crate::effect::take_channel),
//! [`put_channel`](crate::effect::put_channel),
//! [`close_channel`](crate::effect::close_channel)), or from outside any task
//! through [`Runtime::put_channel`](crate::Runtime::put_channel) and
//! [`Runtime::close_channel`](crate::Runtime::close_channel).
//!
//! Takes are served FIFO. Once closed, the buffer is discarded, pending and
//! later takes resolve with [`ChannelItem::Closed`], and puts fail with
//! `ChannelClosed`.

mod buffer;

pub use buffer::BufferPolicy;

use core::fmt;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::{ChannelId, TaskId};
use buffer::{Buffer, Push};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// What a channel take resolves with.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelItem {
    /// A buffered or handed-off item.
    Item(Value),
    /// The channel is closed.
    Closed,
}

impl ChannelItem {
    /// Returns true for the closed sentinel.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns the item, or `None` for the closed sentinel.
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Item(v) => Some(v),
            Self::Closed => None,
        }
    }
}

/// Result of a put.
#[derive(Debug)]
pub(crate) enum PutOutcome {
    /// Handed straight to a parked taker, which must be resumed with the value.
    Handoff(TaskId, Value),
    /// Buffered, or dropped by the buffer policy.
    Accepted,
    /// The putter is parked until a take frees space.
    Parked,
    /// No room and the caller cannot park.
    Full,
}

/// Result of a take.
#[derive(Debug)]
pub(crate) enum TakeOutcome {
    /// Resolved now. `unblocked` is a parked putter that must be resumed.
    Ready {
        item: ChannelItem,
        unblocked: Option<TaskId>,
    },
    /// The taker is parked.
    Parked,
}

/// Tasks released by a close.
#[derive(Debug, Default)]
pub(crate) struct Closed {
    /// Parked takers; resume with the closed sentinel.
    pub takers: Vec<TaskId>,
    /// Parked putters; fail with `ChannelClosed`.
    pub putters: Vec<TaskId>,
}

struct ChannelState {
    buffer: Buffer<Value>,
    takers: VecDeque<TaskId>,
    putters: VecDeque<(TaskId, Value)>,
    closed: bool,
}

/// A buffered queue connecting producer and consumer tasks.
///
/// Cloning yields another handle to the same channel.
#[derive(Clone)]
pub struct Channel {
    id: ChannelId,
    state: Rc<RefCell<ChannelState>>,
}

/// Creates a channel with the given buffer policy.
///
/// `Sliding` and `Dropping` need a capacity of at least 1. `Fixed` with
/// capacity 0 is a rendezvous: every put waits for a taker. `Expanding`
/// treats `capacity` as a preallocation hint.
pub fn channel(policy: BufferPolicy, capacity: usize) -> Result<Channel> {
    if capacity == 0 && matches!(policy, BufferPolicy::Sliding | BufferPolicy::Dropping) {
        return Err(Error::invalid_argument(format!(
            "{policy:?} channel needs a capacity of at least 1"
        )));
    }
    let id = ChannelId::from_raw(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed));
    Ok(Channel {
        id,
        state: Rc::new(RefCell::new(ChannelState {
            buffer: Buffer::new(policy, capacity),
            takers: VecDeque::new(),
            putters: VecDeque::new(),
            closed: false,
        })),
    })
}

impl Channel {
    /// Returns the channel id.
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Returns the buffer policy.
    #[must_use]
    pub fn policy(&self) -> BufferPolicy {
        self.state.borrow().buffer.policy()
    }

    /// Returns the configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.borrow().buffer.capacity()
    }

    /// Returns the number of buffered items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().buffer.len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.borrow().buffer.is_empty()
    }

    /// Returns true once the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Number of tasks parked on take.
    #[must_use]
    pub fn pending_takers(&self) -> usize {
        self.state.borrow().takers.len()
    }

    /// Number of tasks parked on a blocking put.
    #[must_use]
    pub fn pending_putters(&self) -> usize {
        self.state.borrow().putters.len()
    }

    /// Offers `value`. With `putter` set, a full fixed buffer parks that task.
    pub(crate) fn put(&self, putter: Option<TaskId>, value: Value) -> Result<PutOutcome> {
        let mut st = self.state.borrow_mut();
        if st.closed {
            return Err(Error::channel_closed());
        }
        if let Some(taker) = st.takers.pop_front() {
            return Ok(PutOutcome::Handoff(taker, value));
        }
        match st.buffer.push(value) {
            Push::Stored | Push::Evicted(_) | Push::Discarded(_) => Ok(PutOutcome::Accepted),
            Push::Full(value) => match putter {
                Some(task) => {
                    st.putters.push_back((task, value));
                    Ok(PutOutcome::Parked)
                }
                None => Ok(PutOutcome::Full),
            },
        }
    }

    pub(crate) fn take(&self, taker: TaskId) -> TakeOutcome {
        let mut st = self.state.borrow_mut();
        if let Some(item) = st.buffer.pop() {
            let mut unblocked = None;
            if let Some((putter, value)) = st.putters.pop_front() {
                // A fixed buffer just freed one slot.
                let refilled = st.buffer.push(value);
                debug_assert!(matches!(refilled, Push::Stored));
                unblocked = Some(putter);
            }
            return TakeOutcome::Ready {
                item: ChannelItem::Item(item),
                unblocked,
            };
        }
        if let Some((putter, value)) = st.putters.pop_front() {
            return TakeOutcome::Ready {
                item: ChannelItem::Item(value),
                unblocked: Some(putter),
            };
        }
        if st.closed {
            return TakeOutcome::Ready {
                item: ChannelItem::Closed,
                unblocked: None,
            };
        }
        st.takers.push_back(taker);
        TakeOutcome::Parked
    }

    /// Closes the channel. Idempotent: later calls release nothing.
    pub(crate) fn close(&self) -> Closed {
        let mut st = self.state.borrow_mut();
        if st.closed {
            return Closed::default();
        }
        st.closed = true;
        st.buffer.clear();
        Closed {
            takers: st.takers.drain(..).collect(),
            putters: st.putters.drain(..).map(|(task, _)| task).collect(),
        }
    }

    /// Drops a cancelled task's parked take or put.
    pub(crate) fn remove_waiter(&self, task: TaskId) {
        let mut st = self.state.borrow_mut();
        st.takers.retain(|t| *t != task);
        st.putters.retain(|(t, _)| *t != task);
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.try_borrow() {
            Ok(st) => f
                .debug_struct("Channel")
                .field("id", &self.id)
                .field("policy", &st.buffer.policy())
                .field("len", &st.buffer.len())
                .field("closed", &st.closed)
                .finish(),
            Err(_) => f.debug_struct("Channel").field("id", &self.id).finish(),
        }
    }
}
