//! Environment variable and config file support for [`RuntimeBuilder`](super::builder::RuntimeBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`max_watchers(64)`)
//! 2. **Environment variables**: values from `SIDEFX_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `SIDEFX_TIME_MODE` | `virtual` / `wall` | `time_mode` |
//! | `SIDEFX_MAX_WATCHERS` | `usize` | `max_watchers` |
//! | `SIDEFX_MAX_STEPS` | `u64` or `none` | `max_steps_per_run` |
//! | `SIDEFX_AUTO_REAP` | `bool` | `auto_reap` |
//! | `SIDEFX_DEBUG` | `bool` | `debug` |

use crate::error::ConfigError;
use crate::runtime::config::{RuntimeConfig, TimeMode};

/// Environment variable name for the clock source.
pub const ENV_TIME_MODE: &str = "SIDEFX_TIME_MODE";
/// Environment variable name for the watcher limit.
pub const ENV_MAX_WATCHERS: &str = "SIDEFX_MAX_WATCHERS";
/// Environment variable name for the per-run step limit.
pub const ENV_MAX_STEPS: &str = "SIDEFX_MAX_STEPS";
/// Environment variable name for automatic reaping.
pub const ENV_AUTO_REAP: &str = "SIDEFX_AUTO_REAP";
/// Environment variable name for debug logging.
pub const ENV_DEBUG: &str = "SIDEFX_DEBUG";

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_TIME_MODE) {
        config.time_mode = parse_time_mode(ENV_TIME_MODE, &val)?;
    }
    if let Some(val) = read_env(ENV_MAX_WATCHERS) {
        config.max_watchers = parse_usize(ENV_MAX_WATCHERS, &val)?;
    }
    if let Some(val) = read_env(ENV_MAX_STEPS) {
        config.max_steps_per_run = parse_step_limit(ENV_MAX_STEPS, &val)?;
    }
    if let Some(val) = read_env(ENV_AUTO_REAP) {
        config.auto_reap = parse_bool(ENV_AUTO_REAP, &val)?;
    }
    if let Some(val) = read_env(ENV_DEBUG) {
        config.debug = parse_bool(ENV_DEBUG, &val)?;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidEnv {
            var,
            expected: "unsigned integer",
            value: val.to_string(),
        })
}

fn parse_step_limit(var: &'static str, val: &str) -> Result<Option<u64>, ConfigError> {
    let trimmed = val.trim();
    if trimmed.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv {
            var,
            expected: "unsigned integer or `none`",
            value: val.to_string(),
        })
}

fn parse_bool(var: &'static str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            expected: "bool (true/false/1/0/yes/no)",
            value: val.to_string(),
        }),
    }
}

fn parse_time_mode(var: &'static str, val: &str) -> Result<TimeMode, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "virtual" => Ok(TimeMode::Virtual),
        "wall" => Ok(TimeMode::Wall),
        _ => Err(ConfigError::InvalidEnv {
            var,
            expected: "`virtual` or `wall`",
            value: val.to_string(),
        }),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable runtime configuration.
///
/// ```toml
/// [runtime]
/// time_mode = "virtual"
/// max_steps_per_run = 50000
/// auto_reap = true
/// debug = false
///
/// [registry]
/// max_watchers = 256
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct RuntimeTomlConfig {
    /// Scheduler settings.
    #[serde(default)]
    pub runtime: RuntimeToml,
    /// Watcher registry settings.
    #[serde(default)]
    pub registry: RegistryToml,
}

/// Runtime section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct RuntimeToml {
    /// Clock source.
    pub time_mode: Option<TimeMode>,
    /// Per-run step limit.
    pub max_steps_per_run: Option<u64>,
    /// Automatic reaping.
    pub auto_reap: Option<bool>,
    /// Debug logging.
    pub debug: Option<bool>,
}

/// Registry section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct RegistryToml {
    /// Maximum number of registered watchers.
    pub max_watchers: Option<usize>,
}

/// Apply a parsed TOML config to a [`RuntimeConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut RuntimeConfig, toml: &RuntimeTomlConfig) {
    if let Some(v) = toml.runtime.time_mode {
        config.time_mode = v;
    }
    if let Some(v) = toml.runtime.max_steps_per_run {
        config.max_steps_per_run = Some(v);
    }
    if let Some(v) = toml.runtime.auto_reap {
        config.auto_reap = v;
    }
    if let Some(v) = toml.runtime.debug {
        config.debug = v;
    }
    if let Some(v) = toml.registry.max_watchers {
        config.max_watchers = v;
    }
}

/// Parse a TOML string into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RuntimeTomlConfig, ConfigError> {
    Ok(toml::from_str(toml_str)?)
}

/// Read and parse a TOML file into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================
