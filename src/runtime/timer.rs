//! Timer heap for `delay` effects.
//!
//! A min-heap of deadlines. Each timer gets a sequence number; the task
//! parked on it records that number, so a timer that fires for a task no
//! longer waiting on it is ignored.

use crate::types::{TaskId, Time};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A timer entry in the heap.
#[derive(Debug, Clone, Eq, PartialEq)]
struct TimerEntry {
    deadline: Time,
    task: TaskId,
    seq: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap; equal deadlines fire in insertion order.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of timers ordered by deadline.
#[derive(Debug, Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Adds a timer and returns its sequence number.
    pub(crate) fn insert(&mut self, task: TaskId, deadline: Time) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.heap.push(TimerEntry {
            deadline,
            task,
            seq,
        });
        seq
    }

    /// Removes a pending timer.
    pub(crate) fn cancel(&mut self, seq: u64) {
        self.heap.retain(|e| e.seq != seq);
    }

    /// Returns the earliest deadline, if any.
    pub(crate) fn peek_deadline(&self) -> Option<Time> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pops the earliest timer if it is due.
    pub(crate) fn pop_due(&mut self, now: Time) -> Option<(u64, TaskId)> {
        if self.heap.peek()?.deadline > now {
            return None;
        }
        self.heap.pop().map(|e| (e.seq, e.task))
    }

    /// Pops all timers that have expired (deadline <= now).
    pub(crate) fn pop_expired(&mut self, now: Time) -> Vec<(u64, TaskId)> {
        let mut expired = Vec::new();
        while let Some(entry) = self.pop_due(now) {
            expired.push(entry);
        }
        expired
    }
}
