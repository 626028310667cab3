//! Sidefx: a single-threaded saga runtime for application side effects.
//!
//! # Overview
//!
//! A saga is an async body that describes its side effects as [`Effect`]
//! values and awaits them through its context [`Cx`]. The runtime interprets
//! each effect: it calls external functions, waits for actions on the bus,
//! starts and cancels child tasks, races branches, and sleeps on timers. Sagas
//! never perform the side effect themselves, which keeps them testable on a
//! virtual clock.
//!
//! # Core Guarantees
//!
//! - **Cancellation is structural**: cancelling a task cancels its subtree,
//!   children first, and runs every registered cleanup exactly once
//! - **Deterministic ordering**: ready tasks run FIFO, actions are delivered in
//!   dispatch order, and simultaneous `race` winners are decided by
//!   declaration order
//! - **No silent errors**: an error nobody joins is reported to the
//!   configured hook
//! - **No shared-state races**: the runtime is `!Send`; other threads feed it
//!   through [`RemoteDispatcher`]
//!
//! # Module Structure
//!
//! - [`types`]: Identifiers, actions and patterns, cancel reasons, outcomes
//! - [`effect`]: Effect descriptions, sagas, callables, resume values
//! - [`cx`]: The per-task context used to yield effects
//! - [`bus`]: Action delivery to takers and subscribers
//! - [`channel`]: Buffered handoff queues between tasks
//! - [`combinator`]: `race`, `all`, watcher loops and retry
//! - [`record`]: Task and watcher records
//! - [`runtime`]: The scheduler, configuration and builder
//! - [`time`]: Wall and virtual clocks
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```
//! use sidefx::{run_latest, Runtime, RuntimeBuilder, Saga};
//! use serde_json::Value;
//! use std::time::Duration;
//!
//! let rt = RuntimeBuilder::virtual_time().build().unwrap();
//! let search = Saga::named("search", |cx, _args| async move {
//!     cx.delay(100).await?;
//!     cx.put("RESULTS").await?;
//!     Ok(Value::Null)
//! });
//! rt.register("search", &run_latest("QUERY", search), Vec::new()).unwrap();
//! rt.dispatch("QUERY");
//! rt.dispatch("QUERY");
//! rt.advance_time(Duration::from_millis(100)).unwrap();
//! assert_eq!(rt.stats().tasks_cancelled, 1);
//! # let _ = Runtime::new();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod bus;
pub mod channel;
pub mod combinator;
pub mod cx;
pub mod effect;
pub mod error;
pub mod record;
pub mod runtime;
pub mod time;
pub mod tracing_compat;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenient access to core types
pub use bus::Subscription;
pub use channel::{channel, BufferPolicy, Channel, ChannelItem};
pub use combinator::{calculate_delay, run_every, run_latest, run_leading, RetryPolicy};
pub use cx::Cx;
pub use effect::{AllResult, Callable, Effect, RaceResult, Resume, Saga};
pub use error::{
    ConfigError, Error, ErrorCategory, ErrorKind, Recoverability, Result, ResultExt,
};
pub use record::{TaskStatus, WatcherInfo};
pub use runtime::{
    RemoteDispatcher, Runtime, RuntimeBuilder, RuntimeConfig, RuntimeStats, TaskHandle, TimeMode,
    UnhandledError,
};
pub use types::{
    Action, ActionStatus, CancelKind, CancelReason, Outcome, Pattern, SubscriptionId, TaskId,
    Time,
};
