//! Simulator implementations

pub mod synthetic;

pub use synthetic::{SyntheticSimulator, WorldOptions};
