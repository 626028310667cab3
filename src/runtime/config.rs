//! Runtime configuration types.
//!
//! These types hold the concrete values that drive runtime behavior. In most
//! cases you should use [`RuntimeBuilder`](super::builder::RuntimeBuilder) to
//! construct a runtime rather than creating a [`RuntimeConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `time_mode` | `Wall` |
//! | `max_watchers` | 10 000 |
//! | `max_steps_per_run` | `Some(1_000_000)` |
//! | `auto_reap` | true |
//! | `debug` | false |
//! | `error_hook` | `None` (log at error level) |

use core::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{ConfigError, Error};
use crate::tracing_compat::error;
use crate::types::TaskId;

/// Which clock the runtime reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeMode {
    /// Time only moves through `advance_time` or `run_until_quiescent`.
    Virtual,
    /// Monotonic wall-clock time.
    #[default]
    Wall,
}

impl fmt::Display for TimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Virtual => f.write_str("virtual"),
            Self::Wall => f.write_str("wall"),
        }
    }
}

/// A task error nobody awaited.
#[derive(Debug, Clone)]
pub struct UnhandledError {
    /// The task that errored.
    pub task: TaskId,
    /// How the task was started, e.g. `detached` or `watcher:name`.
    pub origin: String,
    /// The saga name.
    pub saga: String,
    /// The error the task settled with.
    pub error: Error,
}

/// Process-wide sink for unhandled task errors.
pub type ErrorHook = Arc<dyn Fn(&UnhandledError) + Send + Sync>;

/// What the runtime does when no hook is installed.
pub fn log_unhandled(report: &UnhandledError) {
    error!(
        task = %report.task,
        origin = %report.origin,
        saga = %report.saga,
        error = %report.error,
        "unhandled task error"
    );
}

/// Runtime configuration.
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Clock source.
    pub time_mode: TimeMode,
    /// Maximum number of registered watchers.
    pub max_watchers: usize,
    /// Poll steps one driver call may take before it gives up (`None` = unbounded).
    pub max_steps_per_run: Option<u64>,
    /// Remove settled task records once their subtree has settled.
    pub auto_reap: bool,
    /// Promote register, unregister and dispatch logs to `info`.
    pub debug: bool,
    /// Receives unhandled task errors.
    pub error_hook: Option<ErrorHook>,
}

impl RuntimeConfig {
    /// Preset for tests: virtual time, everything else default.
    #[must_use]
    pub fn deterministic() -> Self {
        Self {
            time_mode: TimeMode::Virtual,
            ..Self::default()
        }
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_watchers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_watchers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_steps_per_run == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "max_steps_per_run",
                reason: "must be at least 1, or unset for no limit".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn report_unhandled(&self, report: &UnhandledError) {
        match &self.error_hook {
            Some(hook) => hook(report),
            None => log_unhandled(report),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            time_mode: TimeMode::Wall,
            max_watchers: 10_000,
            max_steps_per_run: Some(1_000_000),
            auto_reap: true,
            debug: false,
            error_hook: None,
        }
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("time_mode", &self.time_mode)
            .field("max_watchers", &self.max_watchers)
            .field("max_steps_per_run", &self.max_steps_per_run)
            .field("auto_reap", &self.auto_reap)
            .field("debug", &self.debug)
            .field("error_hook", &self.error_hook.as_ref().map(|_| "<fn>"))
            .finish()
    }
}
