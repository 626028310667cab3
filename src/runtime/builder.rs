//! Runtime builder.
//!
//! Resolves a [`RuntimeConfig`] from, highest priority first, builder
//! methods, `SIDEFX_*` environment variables (opt in with
//! [`RuntimeBuilder::from_env`]), a TOML file (`config-file` feature), and
//! the defaults.

use crate::error::{ConfigError, Result};
use crate::runtime::config::{ErrorHook, RuntimeConfig, TimeMode, UnhandledError};
use crate::runtime::env_config;
use crate::runtime::Runtime;
use std::sync::Arc;

#[derive(Clone, Default)]
struct Overrides {
    time_mode: Option<TimeMode>,
    max_watchers: Option<usize>,
    max_steps_per_run: Option<Option<u64>>,
    auto_reap: Option<bool>,
    debug: Option<bool>,
    error_hook: Option<ErrorHook>,
}

/// Builder for constructing a runtime with custom configuration.
#[derive(Clone, Default)]
pub struct RuntimeBuilder {
    overrides: Overrides,
    read_env: bool,
    #[cfg(feature = "config-file")]
    config_file: Option<std::path::PathBuf>,
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder that also applies `SIDEFX_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            read_env: true,
            ..Self::default()
        }
    }

    /// Runtime on the virtual clock, for deterministic tests.
    #[must_use]
    pub fn virtual_time() -> Self {
        Self::new().time_mode(TimeMode::Virtual)
    }

    /// Load settings from a TOML file below environment variables and
    /// builder methods.
    #[cfg(feature = "config-file")]
    #[must_use]
    pub fn config_file(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Set the clock source.
    #[must_use]
    pub fn time_mode(mut self, mode: TimeMode) -> Self {
        self.overrides.time_mode = Some(mode);
        self
    }

    /// Set the watcher registration limit.
    #[must_use]
    pub fn max_watchers(mut self, limit: usize) -> Self {
        self.overrides.max_watchers = Some(limit);
        self
    }

    /// Set the per-run step limit (`None` = unbounded).
    #[must_use]
    pub fn max_steps_per_run(mut self, limit: Option<u64>) -> Self {
        self.overrides.max_steps_per_run = Some(limit);
        self
    }

    /// Enable or disable automatic reaping of settled tasks.
    #[must_use]
    pub fn auto_reap(mut self, enable: bool) -> Self {
        self.overrides.auto_reap = Some(enable);
        self
    }

    /// Promote lifecycle logs to `info`.
    #[must_use]
    pub fn debug(mut self, enable: bool) -> Self {
        self.overrides.debug = Some(enable);
        self
    }

    /// Install the process-wide sink for unhandled task errors.
    #[must_use]
    pub fn error_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&UnhandledError) + Send + Sync + 'static,
    {
        self.overrides.error_hook = Some(Arc::new(hook));
        self
    }

    /// Resolve the configuration without building a runtime.
    pub fn resolve(self) -> std::result::Result<RuntimeConfig, ConfigError> {
        let mut config = RuntimeConfig::default();
        #[cfg(feature = "config-file")]
        if let Some(path) = &self.config_file {
            let toml = env_config::parse_toml_file(path)?;
            env_config::apply_toml_config(&mut config, &toml);
        }
        if self.read_env {
            env_config::apply_env_overrides(&mut config)?;
        }
        let o = self.overrides;
        if let Some(v) = o.time_mode {
            config.time_mode = v;
        }
        if let Some(v) = o.max_watchers {
            config.max_watchers = v;
        }
        if let Some(v) = o.max_steps_per_run {
            config.max_steps_per_run = v;
        }
        if let Some(v) = o.auto_reap {
            config.auto_reap = v;
        }
        if let Some(v) = o.debug {
            config.debug = v;
        }
        if o.error_hook.is_some() {
            config.error_hook = o.error_hook;
        }
        config.validate()?;
        Ok(config)
    }

    /// Build a runtime from this configuration.
    pub fn build(self) -> Result<Runtime> {
        Ok(Runtime::with_config(self.resolve()?))
    }
}

impl std::fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("read_env", &self.read_env)
            .field("time_mode", &self.overrides.time_mode)
            .field("max_watchers", &self.overrides.max_watchers)
            .finish_non_exhaustive()
    }
}
