//! Watcher registrations.
//!
//! A registration maps a unique name to the root task of a long-lived saga.
//! Names iterate in sorted order. An entry outlives its root task: a
//! watcher whose saga returned stays registered until it is unregistered.

use std::collections::BTreeMap;

use crate::error::{Error, ErrorKind, Result};
use crate::runtime::TaskHandle;
use crate::types::Time;

/// A registered watcher.
#[derive(Debug, Clone)]
pub struct WatcherInfo {
    /// The registered name.
    pub name: String,
    /// The watcher's root task.
    pub root: TaskHandle,
    /// Runtime time at registration.
    pub created_at: Time,
}

#[derive(Debug)]
pub(crate) struct WatcherRegistry {
    entries: BTreeMap<String, WatcherInfo>,
    limit: usize,
}

impl WatcherRegistry {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            limit,
        }
    }

    /// Fails if `name` is taken or the registry is full.
    pub(crate) fn check_available(&self, name: &str) -> Result<()> {
        if self.entries.contains_key(name) {
            return Err(Error::duplicate_name(name));
        }
        if self.entries.len() >= self.limit {
            return Err(Error::new(ErrorKind::WatcherLimit).with_message(format!(
                "cannot register `{name}`: limit of {} watchers reached",
                self.limit
            )));
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, info: WatcherInfo) {
        self.entries.insert(info.name.clone(), info);
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<WatcherInfo> {
        self.entries.remove(name)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&WatcherInfo> {
        self.entries.get(name)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub(crate) fn infos(&self) -> Vec<WatcherInfo> {
        self.entries.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
