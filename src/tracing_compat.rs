//! Logging shim over `tracing`.
//!
//! With the `tracing-integration` feature (on by default) the macros below are
//! the `tracing` crate's own. Without it they expand to nothing, so the
//! scheduler hot path pays nothing for logging it does not emit.
//!
//! ```rust,ignore
//! use sidefx::tracing_compat::{debug, info};
//!
//! debug!(task = %id, "task spawned");
//! info!(watcher = %name, "watcher registered");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn, Level};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    pub use crate::{debug, error, info, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;

/// Emits at `info` when `loud` is set and at `debug` otherwise.
///
/// Used for the lifecycle events that `RuntimeConfig::debug` promotes.
#[macro_export]
#[doc(hidden)]
macro_rules! lifecycle {
    ($loud:expr, $($arg:tt)*) => {
        if $loud {
            $crate::tracing_compat::info!($($arg)*);
        } else {
            $crate::tracing_compat::debug!($($arg)*);
        }
    };
}
