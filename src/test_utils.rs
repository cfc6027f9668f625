//! Test doubles shared by unit tests, integration tests and benchmarks
//!
//! [`ScriptedSimulator`] records every world-changing call in a shared
//! [`SimLog`] so tests can inspect it after the simulator has been moved into
//! a session. [`RecordingRenderer`] does the same for rendered frames.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::renderer::Renderer;
use crate::simulator::{
    ActorId, Blueprint, FrameCallback, Location, Simulator, Transform, WorldSettings, matches_pattern,
};
use crate::types::Frame;
use crate::{Result, StreamError};

/// Build a frame whose pixels encode their own position and the frame index
pub fn sample_frame(width: u32, height: u32, frame_index: u64) -> Frame {
    let pixels: Vec<u8> = (0..width as usize * height as usize * 4)
        .map(|i| (i as u64).wrapping_add(frame_index) as u8)
        .collect();
    Frame::new(width, height, frame_index, pixels).expect("sample frame dimensions are valid")
}

/// Everything a [`ScriptedSimulator`] was asked to do
#[derive(Debug, Default)]
pub struct SimLog {
    /// Settings applied, in order
    pub applied_settings: Vec<WorldSettings>,
    /// Each `destroy_batch` call
    pub destroy_calls: Vec<Vec<ActorId>>,
    /// Completed steps
    pub steps: u64,
    /// `(port, enabled)` traffic manager calls
    pub traffic_manager: Vec<(u16, bool)>,
    /// Vehicles put on autopilot
    pub autopilot: Vec<ActorId>,
    /// `(blueprint, parent, transform)` of every spawned actor
    pub spawned: Vec<(Blueprint, Option<ActorId>, Transform)>,
}

/// Deterministic in-memory simulator
///
/// Delivers one frame per step synchronously from inside `step`, with
/// `frame_index` equal to the step number starting at 0.
pub struct ScriptedSimulator {
    log: Arc<Mutex<SimLog>>,
    settings: WorldSettings,
    next_id: u32,
    actors: BTreeMap<ActorId, String>,
    vehicle_spots: Vec<Location>,
    spawn_points: Vec<Transform>,
    cameras: HashMap<ActorId, (u32, u32)>,
    callback: Option<(ActorId, FrameCallback)>,
    frame: u64,
    skipped_frames: HashSet<u64>,
    fail_step_at: Option<u64>,
    fail_destroy: bool,
    rejected_delta: Option<f64>,
}

impl Default for ScriptedSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSimulator {
    /// One traffic light and ten spawn points
    pub fn new() -> Self {
        let spawn_points = (0..10)
            .map(|i| Transform {
                location: Location { x: i as f32 * 10.0, y: 0.0, z: 0.5 },
                ..Transform::default()
            })
            .collect();
        let sim = Self {
            log: Arc::new(Mutex::new(SimLog::default())),
            settings: WorldSettings::default(),
            next_id: 1,
            actors: BTreeMap::new(),
            vehicle_spots: Vec::new(),
            spawn_points,
            cameras: HashMap::new(),
            callback: None,
            frame: 0,
            skipped_frames: HashSet::new(),
            fail_step_at: None,
            fail_destroy: false,
            rejected_delta: None,
        };
        sim.with_traffic_lights(1)
    }

    /// Replace the map's traffic lights with `count` new ones
    pub fn with_traffic_lights(mut self, count: usize) -> Self {
        self.actors.retain(|_, type_id| type_id != "traffic.traffic_light");
        for _ in 0..count {
            self.add_actor("traffic.traffic_light");
        }
        self
    }

    /// Step `frame_index` completes without delivering a frame
    pub fn skip_frame(mut self, frame_index: u64) -> Self {
        self.skipped_frames.insert(frame_index);
        self
    }

    /// Step number `frame_index` fails
    pub fn fail_step_at(mut self, frame_index: u64) -> Self {
        self.fail_step_at = Some(frame_index);
        self
    }

    /// Every `destroy_batch` call fails (after being logged)
    pub fn fail_destroy(mut self) -> Self {
        self.fail_destroy = true;
        self
    }

    /// Applying stepped settings with this fixed delta fails
    pub fn reject_settings(mut self, fixed_delta_seconds: f64) -> Self {
        self.rejected_delta = Some(fixed_delta_seconds);
        self
    }

    /// Shared handle to the call log
    pub fn log(&self) -> Arc<Mutex<SimLog>> {
        Arc::clone(&self.log)
    }

    fn add_actor(&mut self, type_id: &str) -> ActorId {
        let id = ActorId(self.next_id);
        self.next_id += 1;
        self.actors.insert(id, type_id.to_string());
        id
    }
}

#[async_trait::async_trait]
impl Simulator for ScriptedSimulator {
    async fn settings(&mut self) -> Result<WorldSettings> {
        Ok(self.settings.clone())
    }

    async fn apply_settings(&mut self, settings: &WorldSettings) -> Result<()> {
        if self.rejected_delta.is_some() && settings.fixed_delta_seconds == self.rejected_delta {
            return Err(StreamError::simulator("apply_settings", "rejected by script"));
        }
        self.settings = settings.clone();
        self.log.lock().applied_settings.push(settings.clone());
        Ok(())
    }

    async fn step(&mut self) -> Result<u64> {
        let index = self.frame;
        if self.fail_step_at == Some(index) {
            return Err(StreamError::simulator("tick", format!("scripted failure at step {}", index)));
        }
        self.frame += 1;

        if !self.skipped_frames.contains(&index)
            && let Some((sensor, callback)) = &self.callback
            && let Some((width, height)) = self.cameras.get(sensor)
        {
            callback(sample_frame(*width, *height, index));
        }
        self.log.lock().steps += 1;
        Ok(index)
    }

    async fn blueprints(&mut self, pattern: &str) -> Result<Vec<Blueprint>> {
        Ok(["vehicle.audi.tt", "vehicle.tesla.model3", "sensor.camera.rgb"]
            .into_iter()
            .filter(|id| matches_pattern(pattern, id))
            .map(Blueprint::new)
            .collect())
    }

    async fn spawn_points(&mut self) -> Result<Vec<Transform>> {
        Ok(self.spawn_points.clone())
    }

    async fn find_actors(&mut self, pattern: &str) -> Result<Vec<ActorId>> {
        Ok(self
            .actors
            .iter()
            .filter(|(_, type_id)| matches_pattern(pattern, type_id))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn try_spawn(
        &mut self,
        blueprint: &Blueprint,
        transform: Transform,
        attach_to: Option<ActorId>,
    ) -> Result<Option<ActorId>> {
        if let Some(parent) = attach_to
            && !self.actors.contains_key(&parent)
        {
            return Err(StreamError::simulator("spawn", format!("missing parent {}", parent)));
        }
        let is_vehicle = blueprint.id.starts_with("vehicle.");
        if is_vehicle && self.vehicle_spots.contains(&transform.location) {
            return Ok(None);
        }

        let id = self.add_actor(&blueprint.id);
        if is_vehicle {
            self.vehicle_spots.push(transform.location);
        }
        if blueprint.id == "sensor.camera.rgb" {
            let size = |key: &str| blueprint.attribute(key).and_then(|v| v.parse::<u32>().ok());
            let width = size("image_size_x").unwrap_or(800);
            let height = size("image_size_y").unwrap_or(600);
            self.cameras.insert(id, (width, height));
        }
        self.log.lock().spawned.push((blueprint.clone(), attach_to, transform));
        Ok(Some(id))
    }

    async fn set_autopilot(&mut self, actor: ActorId, enabled: bool) -> Result<()> {
        if enabled {
            self.log.lock().autopilot.push(actor);
        }
        Ok(())
    }

    async fn set_traffic_manager_sync(&mut self, port: u16, enabled: bool) -> Result<()> {
        self.log.lock().traffic_manager.push((port, enabled));
        Ok(())
    }

    async fn destroy_batch(&mut self, actors: &[ActorId]) -> Result<usize> {
        self.log.lock().destroy_calls.push(actors.to_vec());
        if self.fail_destroy {
            return Err(StreamError::simulator("destroy_batch", "scripted failure"));
        }
        let destroyed = actors.iter().filter(|id| self.actors.remove(*id).is_some()).count();
        for id in actors {
            self.cameras.remove(id);
        }
        Ok(destroyed)
    }

    fn register_frame_callback(&mut self, sensor: ActorId, callback: FrameCallback) -> Result<()> {
        if !self.cameras.contains_key(&sensor) {
            return Err(StreamError::simulator("listen", format!("{} is not a camera", sensor)));
        }
        self.callback = Some((sensor, callback));
        Ok(())
    }
}

/// What a [`RecordingRenderer`] was shown
#[derive(Debug, Default)]
pub struct RenderLog {
    /// `(frame_index, overlay)` per shown frame
    pub shown: Vec<(u64, Option<String>)>,
    /// Size of the last shown frame
    pub last_size: Option<(u32, u32)>,
    /// Calls to `close_all`
    pub closed: usize,
}

/// Renderer that records frames and asks to quit after a budget
pub struct RecordingRenderer {
    log: Arc<Mutex<RenderLog>>,
    quit_after: Option<usize>,
    panic_after: Option<usize>,
}

impl RecordingRenderer {
    /// Record frames without ever quitting
    pub fn new() -> Self {
        Self { log: Arc::new(Mutex::new(RenderLog::default())), quit_after: None, panic_after: None }
    }

    /// Request quit once `frames` frames have been shown
    pub fn quit_after(mut self, frames: usize) -> Self {
        self.quit_after = Some(frames);
        self
    }

    /// Panic in `show` once `frames` frames have been shown
    pub fn panic_after(mut self, frames: usize) -> Self {
        self.panic_after = Some(frames);
        self
    }

    /// Shared handle to the render log
    pub fn log(&self) -> Arc<Mutex<RenderLog>> {
        Arc::clone(&self.log)
    }
}

impl Default for RecordingRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for RecordingRenderer {
    fn show(&mut self, frame: &Frame, overlay: Option<&str>) -> Result<()> {
        let shown = self.log.lock().shown.len();
        if self.panic_after.is_some_and(|limit| shown >= limit) {
            panic!("scripted renderer panic at frame {}", frame.frame_index());
        }
        let mut log = self.log.lock();
        log.shown.push((frame.frame_index(), overlay.map(str::to_string)));
        log.last_size = Some((frame.width(), frame.height()));
        Ok(())
    }

    fn poll_quit(&mut self) -> bool {
        self.quit_after.is_some_and(|limit| self.log.lock().shown.len() >= limit)
    }

    fn close_all(&mut self) {
        self.log.lock().closed += 1;
    }
}
