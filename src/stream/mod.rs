//! Stream combinators for subscriber frame streams

pub mod throttle;

pub use throttle::{Throttle, ThrottleExt};
