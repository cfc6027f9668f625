//! Simulator trait for stepped frame sources
//!
//! The streaming core needs very little from a simulator: save and restore
//! its world settings, advance it one step at a time, spawn and batch-destroy
//! actors, and deliver camera frames through a callback. Everything else
//! about the simulator stays behind this trait.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Frame;
use crate::{Result, StreamError};

/// Handle to an actor living in the simulated world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub u32);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

/// World-wide settings that a stepped client changes and must restore
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorldSettings {
    /// World advances only on explicit `step` calls
    pub synchronous_mode: bool,

    /// Simulated seconds per step; `None` lets the server pick
    pub fixed_delta_seconds: Option<f64>,
}

impl WorldSettings {
    /// Stepped mode with a fixed simulated time per step
    pub fn stepped(fixed_delta_seconds: f64) -> Self {
        Self { synchronous_mode: true, fixed_delta_seconds: Some(fixed_delta_seconds) }
    }
}

/// Position in world coordinates (meters)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Orientation in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rotation {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

/// Placement of an actor, relative to its parent when attached
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub rotation: Rotation,
}

/// Spawnable actor template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blueprint {
    /// Dotted identifier, e.g. `sensor.camera.rgb`
    pub id: String,

    /// String attributes, e.g. `image_size_x`
    pub attributes: BTreeMap<String, String>,
}

impl Blueprint {
    /// Blueprint without attributes
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), attributes: BTreeMap::new() }
    }

    /// Set an attribute, builder style
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set_attribute(key, value);
        self
    }

    /// Set an attribute
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl ToString) {
        self.attributes.insert(key.into(), value.to_string());
    }

    /// Read an attribute
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Callback receiving camera frames, invoked from the simulator's own thread
pub type FrameCallback = Box<dyn Fn(Frame) + Send + Sync + 'static>;

/// A stepped simulation that produces camera frames
///
/// `step` blocks until the simulator has finished the tick. Frames are not
/// returned from `step`; they arrive through the callback registered with
/// [`Simulator::register_frame_callback`], possibly on another thread.
#[async_trait::async_trait]
pub trait Simulator: Send + 'static {
    /// Current world settings
    async fn settings(&mut self) -> Result<WorldSettings>;

    /// Replace the world settings
    async fn apply_settings(&mut self, settings: &WorldSettings) -> Result<()>;

    /// Advance the world by one step
    ///
    /// Returns the index of the frame that the step produced.
    async fn step(&mut self) -> Result<u64>;

    /// Blueprints whose id matches a `*` wildcard pattern
    async fn blueprints(&mut self, pattern: &str) -> Result<Vec<Blueprint>>;

    /// Recommended vehicle spawn points of the current map
    async fn spawn_points(&mut self) -> Result<Vec<Transform>>;

    /// Existing actors whose type id matches a `*` wildcard pattern
    async fn find_actors(&mut self, pattern: &str) -> Result<Vec<ActorId>>;

    /// Spawn an actor, or `None` if the spot is taken
    async fn try_spawn(
        &mut self,
        blueprint: &Blueprint,
        transform: Transform,
        attach_to: Option<ActorId>,
    ) -> Result<Option<ActorId>>;

    /// Spawn an actor, failing if it cannot be placed
    async fn spawn(
        &mut self,
        blueprint: &Blueprint,
        transform: Transform,
        attach_to: Option<ActorId>,
    ) -> Result<ActorId> {
        self.try_spawn(blueprint, transform, attach_to).await?.ok_or_else(|| {
            StreamError::simulator("spawn", format!("could not place {}", blueprint.id))
        })
    }

    /// Hand a vehicle to the traffic manager
    async fn set_autopilot(&mut self, actor: ActorId, enabled: bool) -> Result<()>;

    /// Put the traffic manager on `port` in lock-step with the world
    async fn set_traffic_manager_sync(&mut self, port: u16, enabled: bool) -> Result<()>;

    /// Destroy several actors in one round trip
    ///
    /// Returns how many actors were actually destroyed.
    async fn destroy_batch(&mut self, actors: &[ActorId]) -> Result<usize>;

    /// Route every frame rendered by `sensor` to `callback`
    fn register_frame_callback(&mut self, sensor: ActorId, callback: FrameCallback) -> Result<()>;
}

/// Match an id against a pattern where `*` stands for any run of characters
pub fn matches_pattern(pattern: &str, id: &str) -> bool {
    let mut pieces = pattern.split('*');
    let first = pieces.next().unwrap_or_default();
    let Some(mut rest) = id.strip_prefix(first) else {
        return false;
    };

    let pieces: Vec<&str> = pieces.collect();
    let Some((last, middle)) = pieces.split_last() else {
        // No wildcard at all.
        return rest.is_empty();
    };

    for piece in middle {
        match rest.find(piece) {
            Some(pos) => rest = &rest[pos + piece.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_patterns() {
        assert!(matches_pattern("vehicle.*", "vehicle.audi.tt"));
        assert!(!matches_pattern("vehicle.*", "walker.pedestrian.0001"));
        assert!(matches_pattern("traffic.traffic_light*", "traffic.traffic_light"));
        assert!(matches_pattern("sensor.camera.rgb", "sensor.camera.rgb"));
        assert!(!matches_pattern("sensor.camera.rgb", "sensor.camera.rgb2"));
        assert!(matches_pattern("*", "anything"));
        assert!(matches_pattern("*.camera.*", "sensor.camera.depth"));
        assert!(!matches_pattern("*.camera.*", "sensor.lidar.ray_cast"));
        assert!(matches_pattern("a*ba", "aba"));
        assert!(!matches_pattern("ab*ba", "aba"));
    }

    #[test]
    fn blueprint_attributes() {
        let bp = Blueprint::new("sensor.camera.rgb").with_attribute("image_size_x", 800);
        assert_eq!(bp.attribute("image_size_x"), Some("800"));
        assert_eq!(bp.attribute("image_size_y"), None);
    }

    #[test]
    fn stepped_settings() {
        let settings = WorldSettings::stepped(0.05);
        assert!(settings.synchronous_mode);
        assert_eq!(settings.fixed_delta_seconds, Some(0.05));
        assert_eq!(WorldSettings::default().fixed_delta_seconds, None);
    }
}
