//! Internal records for runtime entities.
//!
//! This module contains the record types the runtime uses to track tasks and
//! registered watchers. Only [`TaskStatus`] and [`WatcherInfo`] are public.

pub(crate) mod finalizer;
pub(crate) mod task;
pub(crate) mod watcher;

pub use task::TaskStatus;
pub use watcher::WatcherInfo;
