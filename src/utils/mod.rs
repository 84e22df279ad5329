//! Shared utilities.

pub mod clock;
pub mod decimal;

pub use clock::{Clock, ManualClock, SystemClock};
