//! Core types for the sidefx runtime.
//!
//! - [`id`]: Identifier types (`TaskId`, `ChannelId`, `SubscriptionId`, `Time`)
//! - [`action`]: Actions and match patterns
//! - [`cancel`]: Cancellation reason and kind types
//! - [`outcome`]: Three-valued outcome of a settled task

pub mod action;
pub mod cancel;
pub mod id;
pub mod outcome;

pub use action::{Action, ActionStatus, Pattern};
pub use cancel::{CancelKind, CancelReason};
pub use id::{ChannelId, SubscriptionId, TaskId, Time};
pub use outcome::Outcome;
