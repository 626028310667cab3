//! Channel buffers and their overflow policies.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// What a channel does when a put arrives and the buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferPolicy {
    /// Block the putting task until a take frees space.
    Fixed,
    /// Grow without bound; put never blocks.
    Expanding,
    /// Drop the oldest buffered item to admit the new one.
    Sliding,
    /// Drop the new item; the put still succeeds.
    Dropping,
}

/// Result of offering an item to a buffer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Push<T> {
    Stored,
    /// Stored after evicting the oldest item.
    Evicted(T),
    /// The new item was discarded.
    Discarded(T),
    /// No room under a blocking policy; the item is handed back.
    Full(T),
}

#[derive(Debug)]
pub(crate) struct Buffer<T> {
    policy: BufferPolicy,
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> Buffer<T> {
    pub(crate) fn new(policy: BufferPolicy, capacity: usize) -> Self {
        let prealloc = match policy {
            BufferPolicy::Expanding => capacity.min(64),
            _ => capacity.min(1024),
        };
        Self {
            policy,
            capacity,
            items: VecDeque::with_capacity(prealloc),
        }
    }

    pub(crate) const fn policy(&self) -> BufferPolicy {
        self.policy
    }

    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn is_full(&self) -> bool {
        self.policy != BufferPolicy::Expanding && self.items.len() >= self.capacity
    }

    pub(crate) fn push(&mut self, item: T) -> Push<T> {
        if !self.is_full() {
            self.items.push_back(item);
            return Push::Stored;
        }
        match self.policy {
            BufferPolicy::Fixed => Push::Full(item),
            BufferPolicy::Dropping => Push::Discarded(item),
            BufferPolicy::Sliding => match self.items.pop_front() {
                Some(oldest) => {
                    self.items.push_back(item);
                    Push::Evicted(oldest)
                }
                None => Push::Discarded(item),
            },
            BufferPolicy::Expanding => {
                self.items.push_back(item);
                Push::Stored
            }
        }
    }

    pub(crate) fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub(crate) fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        n
    }
}
