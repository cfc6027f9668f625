//! Render rate control for subscriber frame streams

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often a subscriber hands frames to its renderer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpdateRate {
    /// Every frame that arrives
    #[default]
    Native,

    /// At most this many frames per second, keeping the freshest
    Max(u32),
}

impl UpdateRate {
    /// Build from an optional Hz cap; `None` or `0` means native
    pub fn from_hz(hz: Option<u32>) -> Self {
        match hz {
            Some(hz) if hz > 0 => UpdateRate::Max(hz),
            _ => UpdateRate::Native,
        }
    }

    /// Normalize rate against the publisher's frame frequency
    ///
    /// A cap at or above the source rate never throttles, so it is `Native`.
    pub fn normalize(self, source_hz: f64) -> Self {
        match self {
            UpdateRate::Native => UpdateRate::Native,
            UpdateRate::Max(0) => UpdateRate::Native,
            UpdateRate::Max(hz) if hz as f64 >= source_hz => UpdateRate::Native,
            UpdateRate::Max(hz) => UpdateRate::Max(hz),
        }
    }

    /// Throttle interval, if any
    pub fn throttle_interval(self, source_hz: f64) -> Option<Duration> {
        match self.normalize(source_hz) {
            UpdateRate::Native => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_above_source_rate_are_native() {
        assert_eq!(UpdateRate::Max(30).normalize(20.0), UpdateRate::Native);
        assert_eq!(UpdateRate::Max(10).normalize(20.0), UpdateRate::Max(10));
        assert_eq!(UpdateRate::Max(0).normalize(20.0), UpdateRate::Native);
    }

    #[test]
    fn throttle_interval_matches_cap() {
        assert_eq!(UpdateRate::Native.throttle_interval(20.0), None);
        assert_eq!(
            UpdateRate::Max(5).throttle_interval(20.0),
            Some(Duration::from_millis(200))
        );
    }

    #[test]
    fn from_hz_treats_zero_as_native() {
        assert_eq!(UpdateRate::from_hz(None), UpdateRate::Native);
        assert_eq!(UpdateRate::from_hz(Some(0)), UpdateRate::Native);
        assert_eq!(UpdateRate::from_hz(Some(12)), UpdateRate::Max(12));
    }
}
