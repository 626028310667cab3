//! Time sources.

mod driver;

pub(crate) use driver::Clock;
pub use driver::{TimeSource, VirtualClock, WallClock};
