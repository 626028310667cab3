//! Clock sources for the runtime.
//!
//! [`TimeMode::Wall`](crate::runtime::TimeMode::Wall) reads a [`WallClock`];
//! [`TimeMode::Virtual`](crate::runtime::TimeMode::Virtual) reads a
//! [`VirtualClock`] that only moves when the runtime is told to advance.

use crate::types::Time;
use std::sync::atomic::{AtomicU64, Ordering};

/// A source of the current time.
pub trait TimeSource: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Time;
}

/// Monotonic wall clock; the epoch is the moment the clock was created.
#[derive(Debug)]
pub struct WallClock {
    epoch: std::time::Instant,
}

impl WallClock {
    /// Creates a new wall clock time source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: std::time::Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Time {
        Time::ZERO + self.epoch.elapsed()
    }
}

/// Virtual time source for deterministic tests.
///
/// ```
/// use sidefx::time::{TimeSource, VirtualClock};
/// use sidefx::types::Time;
///
/// let clock = VirtualClock::new();
/// assert_eq!(clock.now(), Time::ZERO);
/// clock.advance_to(Time::from_millis(5));
/// assert_eq!(clock.now(), Time::from_millis(5));
/// ```
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: AtomicU64,
}

impl VirtualClock {
    /// Creates a new virtual clock starting at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
        }
    }

    /// Advances time to the given absolute time.
    ///
    /// If the target time is in the past, this is a no-op.
    pub fn advance_to(&self, time: Time) {
        self.now.fetch_max(time.as_nanos(), Ordering::AcqRel);
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Time {
        Time::from_nanos(self.now.load(Ordering::Acquire))
    }
}

/// The clock a runtime reads, chosen by its time mode.
#[derive(Debug)]
pub(crate) enum Clock {
    Wall(WallClock),
    Virtual(VirtualClock),
}

impl Clock {
    pub(crate) fn now(&self) -> Time {
        match self {
            Self::Wall(c) => c.now(),
            Self::Virtual(c) => c.now(),
        }
    }

    pub(crate) fn as_virtual(&self) -> Option<&VirtualClock> {
        match self {
            Self::Virtual(c) => Some(c),
            Self::Wall(_) => None,
        }
    }
}
