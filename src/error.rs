//! Error types and error handling strategy for sidefx.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - A failed effect is delivered to the saga at its suspension point
//! - Saga panics are isolated at the poll boundary and become `Panicked` errors
//! - Errors are classified by recoverability for retry logic
//!
//! # Error Categories
//!
//! - **Registry**: watcher registration failures
//! - **Effect**: an external call failed, or a saga was resumed with the wrong value
//! - **Channel**: put on a closed or full channel
//! - **Cancellation**: a joined or awaited task was cancelled
//! - **Runtime**: step limits, stalls, panics and invariant violations
//! - **User**: errors raised by saga code itself

use core::fmt;
use std::sync::Arc;

use crate::types::{CancelReason, TaskId};

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Registry ===
    /// A watcher with this name is already registered.
    DuplicateName,
    /// The registry already holds the configured maximum number of watchers.
    WatcherLimit,

    // === Effects ===
    /// An external callable failed; the cause is the error source.
    EffectResolution,
    /// A saga was resumed with a value of a different shape than it asked for.
    UnexpectedResume,
    /// An effect was built with arguments the interpreter cannot accept.
    InvalidArgument,

    // === Channels ===
    /// Put on a closed channel.
    ChannelClosed,
    /// Non-blocking put on a full channel.
    ChannelFull,

    // === Cancellation ===
    /// The awaited task was cancelled.
    Cancelled,

    // === Runtime ===
    /// The runtime ran out of work before the awaited task settled.
    Stalled,
    /// A single run exceeded `RuntimeConfig::max_steps_per_run`.
    StepLimitExceeded,
    /// Saga code panicked.
    Panicked,
    /// Internal runtime error (bug).
    Internal,

    // === User ===
    /// User-provided error.
    User,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::DuplicateName | Self::WatcherLimit => ErrorCategory::Registry,
            Self::EffectResolution | Self::UnexpectedResume | Self::InvalidArgument => {
                ErrorCategory::Effect
            }
            Self::ChannelClosed | Self::ChannelFull => ErrorCategory::Channel,
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::Stalled | Self::StepLimitExceeded | Self::Panicked | Self::Internal => {
                ErrorCategory::Runtime
            }
            Self::User => ErrorCategory::User,
        }
    }

    /// Returns the recoverability classification for this error kind.
    ///
    /// [`Cx::retry`](crate::cx::Cx::retry) stops early on permanent errors.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            Self::ChannelFull | Self::WatcherLimit => Recoverability::Transient,

            Self::DuplicateName
            | Self::UnexpectedResume
            | Self::InvalidArgument
            | Self::ChannelClosed
            | Self::Cancelled
            | Self::StepLimitExceeded
            | Self::Panicked
            | Self::Internal => Recoverability::Permanent,

            Self::EffectResolution | Self::Stalled | Self::User => Recoverability::Unknown,
        }
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.recoverability(), Recoverability::Transient)
    }
}

/// Classification of error recoverability for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Permanent failure that will not succeed on retry.
    Permanent,
    /// Recoverability depends on context and cannot be determined
    /// from the error kind alone.
    Unknown,
}

impl Recoverability {
    /// Returns true if this error is safe to retry.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Returns true if this error should never be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent)
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Watcher registry failures.
    Registry,
    /// Effect construction and resolution failures.
    Effect,
    /// Channel failures.
    Channel,
    /// Cancellation observed through a join or combinator.
    Cancellation,
    /// Runtime limits and internal errors.
    Runtime,
    /// User-originated errors.
    User,
}

/// Diagnostic context for an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// The task where the error was raised.
    pub task_id: Option<TaskId>,
    /// The watcher owning that task, when known.
    pub watcher: Option<String>,
}

/// The main error type for sidefx operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    context: ErrorContext,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            context: ErrorContext {
                task_id: None,
                watcher: None,
            },
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds structured context to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        self.context = ctx;
        self
    }

    /// Records the task the error was raised in, unless one is already set.
    #[must_use]
    pub fn in_task(mut self, task: TaskId) -> Self {
        self.context.task_id.get_or_insert(task);
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Creates a user error with a message.
    #[must_use]
    pub fn user(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(msg)
    }

    /// Creates a cancellation error from a structured reason.
    #[must_use]
    pub fn cancelled(reason: &CancelReason) -> Self {
        Self::new(ErrorKind::Cancelled).with_message(format!("{reason}"))
    }

    /// Wraps the failure of an external callable.
    #[must_use]
    pub fn effect_resolution(callable: &str, cause: Self) -> Self {
        let task = cause.context.task_id;
        let mut err = Self::new(ErrorKind::EffectResolution)
            .with_message(format!("call `{callable}` failed: {cause}"))
            .with_source(cause);
        err.context.task_id = task;
        err
    }

    /// Creates a duplicate watcher name error.
    #[must_use]
    pub fn duplicate_name(name: &str) -> Self {
        Self::new(ErrorKind::DuplicateName)
            .with_message(format!("watcher `{name}` is already registered"))
    }

    /// Creates an unexpected resume error.
    #[must_use]
    pub fn unexpected_resume(expected: &str, actual: &str) -> Self {
        Self::new(ErrorKind::UnexpectedResume)
            .with_message(format!("expected {expected}, resumed with {actual}"))
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument).with_message(detail)
    }

    /// Creates a closed channel error.
    #[must_use]
    pub fn channel_closed() -> Self {
        Self::new(ErrorKind::ChannelClosed).with_message("put on a closed channel")
    }

    /// Creates an error for a panic caught while polling a saga.
    #[must_use]
    pub fn panicked(payload: &(dyn std::any::Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::new(ErrorKind::Panicked).with_message(detail)
    }

    /// Creates an internal error (runtime bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the recoverability classification.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        self.kind.recoverability()
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the error context.
    #[must_use]
    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Returns the wrapped cause when it is itself a sidefx error.
    #[must_use]
    pub fn cause(&self) -> Option<&Self> {
        self.source
            .as_deref()
            .and_then(|source| source.downcast_ref::<Self>())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::InvalidArgument)
            .with_message(format!("payload conversion failed: {e}"))
            .with_source(e)
    }
}

/// Extension trait for adding context to Results.
#[allow(clippy::result_large_err)]
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach context message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_message(f()))
    }
}

/// A specialized Result type for sidefx operations.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;

/// Failure to assemble a [`RuntimeConfig`](crate::runtime::RuntimeConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held a value that does not parse.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Human description of the accepted values.
        expected: &'static str,
        /// Raw value read from the environment.
        value: String,
    },
    /// A configuration value is out of its accepted range.
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Config field name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File path as given.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid TOML for this schema.
    #[cfg(feature = "config-file")]
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::new(ErrorKind::InvalidArgument)
            .with_message(e.to_string())
            .with_source(e)
    }
}
