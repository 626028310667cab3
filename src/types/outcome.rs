//! Three-valued outcome of a settled task.
//!
//! - `Ok(T)`: the saga returned normally
//! - `Err(Error)`: the saga returned an error or panicked
//! - `Cancelled(CancelReason)`: the task was cancelled
//!
//! Severity orders them `Ok < Err < Cancelled`.

use super::cancel::CancelReason;
use crate::error::{Error, Result};

/// The final outcome of a task.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// Success with value.
    Ok(T),
    /// The task failed.
    Err(Error),
    /// The task was cancelled before it could finish.
    Cancelled(CancelReason),
}

impl<T> Outcome<T> {
    /// Returns the severity of this outcome.
    #[must_use]
    pub const fn severity(&self) -> u8 {
        match self {
            Self::Ok(_) => 0,
            Self::Err(_) => 1,
            Self::Cancelled(_) => 2,
        }
    }

    /// Returns true if this is `Ok`.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Returns true if this is `Err`.
    #[must_use]
    pub const fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    /// Returns true if this is `Cancelled`.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Converts into a `Result`, turning cancellation into a `Cancelled` error.
    pub fn into_result(self) -> Result<T> {
        match self {
            Self::Ok(v) => Ok(v),
            Self::Err(e) => Err(e),
            Self::Cancelled(reason) => Err(Error::cancelled(&reason)),
        }
    }

    /// Maps the success value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Self::Ok(v) => Outcome::Ok(f(v)),
            Self::Err(e) => Outcome::Err(e),
            Self::Cancelled(r) => Outcome::Cancelled(r),
        }
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(v) => Self::Ok(v),
            Err(e) => Self::Err(e),
        }
    }
}
