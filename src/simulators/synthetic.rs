//! In-process simulator producing synthetic camera frames
//!
//! Stands in for a real simulation server: it keeps a small world with a
//! blueprint library, spawn points and a handful of traffic lights, honours
//! stepped mode, and renders a moving test pattern for every camera sensor on
//! each step. Frames are delivered from a dedicated `sensor-dispatch` thread,
//! the same way a simulator client library calls back from its own threads.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

use crate::config::SimulatorConfig;
use crate::simulator::{
    ActorId, Blueprint, FrameCallback, Location, Simulator, Transform, WorldSettings, matches_pattern,
};
use crate::types::{BYTES_PER_PIXEL, Frame, expected_len};
use crate::{Result, StreamError};

/// Blueprint id of the RGB camera sensor
pub const CAMERA_BLUEPRINT: &str = "sensor.camera.rgb";

/// Type id of map traffic lights
pub const TRAFFIC_LIGHT_TYPE: &str = "traffic.traffic_light";

const VEHICLE_BLUEPRINTS: &[&str] = &[
    "vehicle.audi.tt",
    "vehicle.tesla.model3",
    "vehicle.mercedes.coupe",
    "vehicle.nissan.micra",
    "vehicle.lincoln.mkz",
];

const DEFAULT_IMAGE_WIDTH: u32 = 800;
const DEFAULT_IMAGE_HEIGHT: u32 = 600;

/// Shape of the generated world
#[derive(Debug, Clone, PartialEq)]
pub struct WorldOptions {
    /// Traffic lights placed on the map
    pub traffic_lights: usize,
    /// Vehicle spawn points on the map
    pub spawn_points: usize,
    /// Sleep `fixed_delta_seconds` of wall-clock time per step
    pub realtime: bool,
}

impl Default for WorldOptions {
    fn default() -> Self {
        Self { traffic_lights: 4, spawn_points: 60, realtime: false }
    }
}

impl From<&SimulatorConfig> for WorldOptions {
    fn from(config: &SimulatorConfig) -> Self {
        Self {
            traffic_lights: config.traffic_lights,
            spawn_points: config.spawn_points,
            realtime: config.realtime,
        }
    }
}

#[derive(Debug)]
struct Actor {
    type_id: String,
    transform: Transform,
    parent: Option<ActorId>,
    autopilot: bool,
    camera: Option<(u32, u32)>,
}

impl Actor {
    fn is_vehicle(&self) -> bool {
        self.type_id.starts_with("vehicle.")
    }
}

#[derive(Debug)]
struct World {
    settings: WorldSettings,
    frame: u64,
    next_id: u32,
    actors: BTreeMap<ActorId, Actor>,
    spawn_points: Vec<Transform>,
    blueprints: Vec<Blueprint>,
    traffic_manager_sync: HashMap<u16, bool>,
}

impl World {
    fn generate(options: &WorldOptions) -> Self {
        let mut blueprints: Vec<Blueprint> = VEHICLE_BLUEPRINTS.iter().map(|id| Blueprint::new(*id)).collect();
        blueprints.push(
            Blueprint::new(CAMERA_BLUEPRINT)
                .with_attribute("image_size_x", DEFAULT_IMAGE_WIDTH)
                .with_attribute("image_size_y", DEFAULT_IMAGE_HEIGHT)
                .with_attribute("fov", 90),
        );
        blueprints.push(Blueprint::new(TRAFFIC_LIGHT_TYPE));

        // Spawn points on a 10-wide grid of 12 m cells.
        let spawn_points = (0..options.spawn_points)
            .map(|i| Transform {
                location: Location { x: (i % 10) as f32 * 12.0, y: (i / 10) as f32 * 12.0, z: 0.5 },
                ..Transform::default()
            })
            .collect();

        let mut world = Self {
            settings: WorldSettings::default(),
            frame: 0,
            next_id: 1,
            actors: BTreeMap::new(),
            spawn_points,
            blueprints,
            traffic_manager_sync: HashMap::new(),
        };

        for i in 0..options.traffic_lights {
            let transform = Transform {
                location: Location { x: i as f32 * 60.0 + 6.0, y: 6.0, z: 0.0 },
                ..Transform::default()
            };
            world.insert(Actor {
                type_id: TRAFFIC_LIGHT_TYPE.to_string(),
                transform,
                parent: None,
                autopilot: false,
                camera: None,
            });
        }
        world
    }

    fn insert(&mut self, actor: Actor) -> ActorId {
        let id = ActorId(self.next_id);
        self.next_id += 1;
        self.actors.insert(id, actor);
        id
    }

    fn spot_taken(&self, location: &Location) -> bool {
        self.actors
            .values()
            .any(|actor| actor.is_vehicle() && actor.parent.is_none() && actor.transform.location == *location)
    }
}

enum DispatchJob {
    Register { sensor: ActorId, callback: FrameCallback },
    Remove(ActorId),
    Render { sensor: ActorId, width: u32, height: u32, frame_index: u64 },
    Barrier(oneshot::Sender<()>),
}

/// Simulator that runs entirely in this process
pub struct SyntheticSimulator {
    address: String,
    world: Arc<Mutex<World>>,
    realtime: bool,
    dispatch: Option<Sender<DispatchJob>>,
    dispatch_thread: Option<JoinHandle<()>>,
}

impl SyntheticSimulator {
    /// Connect with the default world layout
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        Self::connect_with(host, port, timeout, WorldOptions::default())
    }

    /// Connect using the simulator section of the configuration
    pub fn from_config(config: &SimulatorConfig) -> Result<Self> {
        Self::connect_with(&config.host, config.port, config.timeout(), WorldOptions::from(config))
    }

    /// Connect and generate a world with the given shape
    pub fn connect_with(host: &str, port: u16, timeout: Duration, options: WorldOptions) -> Result<Self> {
        let address = format!("{}:{}", host, port);
        if host.trim().is_empty() {
            return Err(StreamError::simulator_connection(address, "empty host name"));
        }
        if port == 0 {
            return Err(StreamError::simulator_connection(address, "port 0 is not a valid server port"));
        }
        if timeout.is_zero() {
            return Err(StreamError::Timeout { duration: timeout });
        }

        let world = Arc::new(Mutex::new(World::generate(&options)));
        let (tx, rx) = crossbeam_channel::unbounded();
        let dispatch_thread = std::thread::Builder::new()
            .name("sensor-dispatch".to_string())
            .spawn(move || dispatch_loop(rx))
            .map_err(|e| StreamError::io("spawning sensor dispatch thread", e))?;

        info!(
            address = %address,
            traffic_lights = options.traffic_lights,
            spawn_points = options.spawn_points,
            "Connected to synthetic simulator"
        );

        Ok(Self {
            address,
            world,
            realtime: options.realtime,
            dispatch: Some(tx),
            dispatch_thread: Some(dispatch_thread),
        })
    }

    /// Address this simulator was connected with
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Number of actors currently alive, map actors included
    pub fn actor_count(&self) -> usize {
        self.world.lock().actors.len()
    }

    /// Whether the traffic manager on `port` was put into lock-step
    pub fn traffic_manager_synchronous(&self, port: u16) -> bool {
        self.world.lock().traffic_manager_sync.get(&port).copied().unwrap_or(false)
    }

    fn send(&self, job: DispatchJob) -> Result<()> {
        let tx = self
            .dispatch
            .as_ref()
            .ok_or_else(|| StreamError::simulator("dispatch", "simulator is shut down"))?;
        tx.send(job).map_err(|_| StreamError::simulator("dispatch", "sensor dispatch thread stopped"))
    }
}

impl Drop for SyntheticSimulator {
    fn drop(&mut self) {
        // Closing the channel ends the dispatch loop.
        self.dispatch.take();
        if let Some(handle) = self.dispatch_thread.take()
            && handle.join().is_err()
        {
            error!("Sensor dispatch thread panicked");
        }
    }
}

#[async_trait::async_trait]
impl Simulator for SyntheticSimulator {
    async fn settings(&mut self) -> Result<WorldSettings> {
        Ok(self.world.lock().settings.clone())
    }

    async fn apply_settings(&mut self, settings: &WorldSettings) -> Result<()> {
        if let Some(dt) = settings.fixed_delta_seconds
            && !(dt > 0.0)
        {
            return Err(StreamError::simulator("apply_settings", format!("fixed delta must be positive, got {}", dt)));
        }
        debug!(
            synchronous = settings.synchronous_mode,
            fixed_delta = ?settings.fixed_delta_seconds,
            "Applying world settings"
        );
        self.world.lock().settings = settings.clone();
        Ok(())
    }

    async fn step(&mut self) -> Result<u64> {
        let (frame_index, cameras, pace) = {
            let mut world = self.world.lock();
            let frame_index = world.frame;
            world.frame += 1;

            // Autopilot vehicles creep forward so consecutive frames differ.
            for actor in world.actors.values_mut().filter(|a| a.autopilot) {
                actor.transform.location.x += 0.1;
            }

            let cameras: Vec<(ActorId, u32, u32)> = world
                .actors
                .iter()
                .filter_map(|(id, actor)| actor.camera.map(|(w, h)| (*id, w, h)))
                .collect();
            let pace = world.settings.fixed_delta_seconds.filter(|_| self.realtime);
            (frame_index, cameras, pace)
        };

        for (sensor, width, height) in cameras {
            self.send(DispatchJob::Render { sensor, width, height, frame_index })?;
        }

        // The step completes only once every callback for it has run.
        let (done_tx, done_rx) = oneshot::channel();
        self.send(DispatchJob::Barrier(done_tx))?;
        done_rx
            .await
            .map_err(|_| StreamError::simulator("step", "sensor dispatch thread stopped"))?;

        if let Some(dt) = pace {
            tokio::time::sleep(Duration::from_secs_f64(dt)).await;
        }

        trace!(frame_index, "Stepped world");
        Ok(frame_index)
    }

    async fn blueprints(&mut self, pattern: &str) -> Result<Vec<Blueprint>> {
        let world = self.world.lock();
        Ok(world.blueprints.iter().filter(|bp| matches_pattern(pattern, &bp.id)).cloned().collect())
    }

    async fn spawn_points(&mut self) -> Result<Vec<Transform>> {
        Ok(self.world.lock().spawn_points.clone())
    }

    async fn find_actors(&mut self, pattern: &str) -> Result<Vec<ActorId>> {
        let world = self.world.lock();
        Ok(world
            .actors
            .iter()
            .filter(|(_, actor)| matches_pattern(pattern, &actor.type_id))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn try_spawn(
        &mut self,
        blueprint: &Blueprint,
        transform: Transform,
        attach_to: Option<ActorId>,
    ) -> Result<Option<ActorId>> {
        let mut world = self.world.lock();

        if !world.blueprints.iter().any(|bp| bp.id == blueprint.id) {
            return Err(StreamError::simulator("spawn", format!("unknown blueprint '{}'", blueprint.id)));
        }
        if let Some(parent) = attach_to
            && !world.actors.contains_key(&parent)
        {
            return Err(StreamError::simulator("spawn", format!("cannot attach to missing {}", parent)));
        }

        let camera = if blueprint.id == CAMERA_BLUEPRINT {
            let size = |key: &str, default: u32| -> Result<u32> {
                match blueprint.attribute(key) {
                    Some(raw) => raw.parse().map_err(|_| {
                        StreamError::simulator("spawn", format!("attribute {} = '{}' is not a size", key, raw))
                    }),
                    None => Ok(default),
                }
            };
            let width = size("image_size_x", DEFAULT_IMAGE_WIDTH)?;
            let height = size("image_size_y", DEFAULT_IMAGE_HEIGHT)?;
            expected_len(width, height)
                .map_err(|e| StreamError::simulator("spawn", format!("invalid camera size: {}", e)))?;
            Some((width, height))
        } else {
            None
        };

        let actor = Actor {
            type_id: blueprint.id.clone(),
            transform,
            parent: attach_to,
            autopilot: false,
            camera,
        };
        if actor.is_vehicle() && attach_to.is_none() && world.spot_taken(&transform.location) {
            trace!(blueprint = %blueprint.id, "Spawn point occupied");
            return Ok(None);
        }

        let id = world.insert(actor);
        debug!(actor = %id, blueprint = %blueprint.id, parent = ?attach_to, "Spawned actor");
        Ok(Some(id))
    }

    async fn set_autopilot(&mut self, actor: ActorId, enabled: bool) -> Result<()> {
        let mut world = self.world.lock();
        match world.actors.get_mut(&actor) {
            Some(a) if a.is_vehicle() => {
                a.autopilot = enabled;
                Ok(())
            }
            Some(a) => Err(StreamError::simulator(
                "set_autopilot",
                format!("{} is a {}, not a vehicle", actor, a.type_id),
            )),
            None => Err(StreamError::simulator("set_autopilot", format!("no such actor {}", actor))),
        }
    }

    async fn set_traffic_manager_sync(&mut self, port: u16, enabled: bool) -> Result<()> {
        debug!(port, enabled, "Traffic manager synchronous mode");
        self.world.lock().traffic_manager_sync.insert(port, enabled);
        Ok(())
    }

    async fn destroy_batch(&mut self, actors: &[ActorId]) -> Result<usize> {
        let mut removed = Vec::with_capacity(actors.len());
        {
            let mut world = self.world.lock();
            for id in actors {
                match world.actors.remove(id) {
                    Some(actor) => removed.push((*id, actor.camera.is_some())),
                    None => warn!(actor = %id, "Cannot destroy unknown actor"),
                }
            }
        }

        for (id, is_camera) in &removed {
            if *is_camera {
                self.send(DispatchJob::Remove(*id))?;
            }
        }
        debug!(requested = actors.len(), destroyed = removed.len(), "Destroyed actor batch");
        Ok(removed.len())
    }

    fn register_frame_callback(&mut self, sensor: ActorId, callback: FrameCallback) -> Result<()> {
        {
            let world = self.world.lock();
            match world.actors.get(&sensor) {
                Some(actor) if actor.camera.is_some() => {}
                Some(actor) => {
                    return Err(StreamError::simulator(
                        "listen",
                        format!("{} is a {}, not a camera", sensor, actor.type_id),
                    ));
                }
                None => return Err(StreamError::simulator("listen", format!("no such sensor {}", sensor))),
            }
        }
        self.send(DispatchJob::Register { sensor, callback })
    }
}

fn dispatch_loop(jobs: Receiver<DispatchJob>) {
    let mut callbacks: HashMap<ActorId, FrameCallback> = HashMap::new();

    for job in jobs {
        match job {
            DispatchJob::Register { sensor, callback } => {
                callbacks.insert(sensor, callback);
            }
            DispatchJob::Remove(sensor) => {
                callbacks.remove(&sensor);
            }
            DispatchJob::Render { sensor, width, height, frame_index } => {
                let Some(callback) = callbacks.get(&sensor) else {
                    continue;
                };
                let frame = match Frame::new(width, height, frame_index, render_test_pattern(width, height, frame_index)) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!(sensor = %sensor, "Failed to build frame: {}", e);
                        continue;
                    }
                };
                if std::panic::catch_unwind(AssertUnwindSafe(|| callback(frame))).is_err() {
                    error!(sensor = %sensor, frame_index, "Frame callback panicked");
                }
            }
            DispatchJob::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Sensor dispatch thread exiting");
}

/// Render a BGRA test pattern: colour gradient plus a bar sweeping with the frame index
pub fn render_test_pattern(width: u32, height: u32, frame_index: u64) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(width as usize * height as usize * BYTES_PER_PIXEL);
    let bar = (frame_index.wrapping_mul(8) % u64::from(width)) as u32;
    let red = (frame_index % 256) as u8;

    for y in 0..height {
        let green = (y * 255 / height.max(1)) as u8;
        for x in 0..width {
            if x.abs_diff(bar) < 4 {
                pixels.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
            } else {
                let blue = (x * 255 / width.max(1)) as u8;
                pixels.extend_from_slice(&[blue, green, red, 0xFF]);
            }
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::FrameQueue;

    fn connect() -> SyntheticSimulator {
        SyntheticSimulator::connect("localhost", 2000, Duration::from_secs(10)).unwrap()
    }

    fn camera(width: u32, height: u32) -> Blueprint {
        Blueprint::new(CAMERA_BLUEPRINT)
            .with_attribute("image_size_x", width)
            .with_attribute("image_size_y", height)
    }

    #[test]
    fn connect_validates_address() {
        let timeout = Duration::from_secs(1);
        assert!(matches!(
            SyntheticSimulator::connect("", 2000, timeout),
            Err(StreamError::SimulatorConnection { .. })
        ));
        assert!(matches!(
            SyntheticSimulator::connect("localhost", 0, timeout),
            Err(StreamError::SimulatorConnection { .. })
        ));
        assert!(matches!(
            SyntheticSimulator::connect("localhost", 2000, Duration::ZERO),
            Err(StreamError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn world_starts_with_traffic_lights() {
        let mut sim = connect();
        let lights = sim.find_actors("traffic.traffic_light*").await.unwrap();
        assert_eq!(lights.len(), 4);
        assert_eq!(sim.spawn_points().await.unwrap().len(), 60);
        assert_eq!(sim.blueprints("vehicle.*").await.unwrap().len(), VEHICLE_BLUEPRINTS.len());
    }

    #[tokio::test]
    async fn occupied_spawn_point_returns_none() {
        let mut sim = connect();
        let spot = sim.spawn_points().await.unwrap()[0];
        let bp = Blueprint::new("vehicle.audi.tt");

        assert!(sim.try_spawn(&bp, spot, None).await.unwrap().is_some());
        assert!(sim.try_spawn(&bp, spot, None).await.unwrap().is_none());
        assert!(sim.spawn(&bp, spot, None).await.is_err());
    }

    #[tokio::test]
    async fn spawn_rejects_unknown_blueprint_and_parent() {
        let mut sim = connect();
        let unknown = Blueprint::new("walker.pedestrian.0001");
        assert!(sim.try_spawn(&unknown, Transform::default(), None).await.is_err());

        let err = sim.try_spawn(&camera(8, 8), Transform::default(), Some(ActorId(999))).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn step_delivers_frames_before_returning() {
        let mut sim = connect();
        let light = sim.find_actors(TRAFFIC_LIGHT_TYPE).await.unwrap()[0];
        let sensor = sim.spawn(&camera(16, 12), Transform::default(), Some(light)).await.unwrap();

        let queue = FrameQueue::unbounded();
        let sink = queue.sink();
        sim.register_frame_callback(sensor, Box::new(move |frame| sink.push(frame))).unwrap();

        for expected in 0..3 {
            assert_eq!(sim.step().await.unwrap(), expected);
            let frame = queue.try_pop().expect("frame delivered during step");
            assert_eq!(frame.frame_index(), expected);
            assert_eq!((frame.width(), frame.height()), (16, 12));
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn destroyed_camera_stops_producing() {
        let mut sim = connect();
        let sensor = sim.spawn(&camera(4, 4), Transform::default(), None).await.unwrap();
        let queue = FrameQueue::unbounded();
        let sink = queue.sink();
        sim.register_frame_callback(sensor, Box::new(move |frame| sink.push(frame))).unwrap();

        let before = sim.actor_count();
        assert_eq!(sim.destroy_batch(&[sensor, ActorId(4242)]).await.unwrap(), 1);
        assert_eq!(sim.actor_count(), before - 1);

        sim.step().await.unwrap();
        assert!(queue.try_pop().is_none());
    }

    #[tokio::test]
    async fn panicking_callback_does_not_stop_dispatch() {
        let mut sim = connect();
        let sensor = sim.spawn(&camera(4, 4), Transform::default(), None).await.unwrap();
        sim.register_frame_callback(sensor, Box::new(|_| panic!("callback failure"))).unwrap();

        assert_eq!(sim.step().await.unwrap(), 0);
        assert_eq!(sim.step().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn callback_requires_a_camera() {
        let mut sim = connect();
        let light = sim.find_actors(TRAFFIC_LIGHT_TYPE).await.unwrap()[0];
        assert!(sim.register_frame_callback(light, Box::new(|_| {})).is_err());
        assert!(sim.register_frame_callback(ActorId(777), Box::new(|_| {})).is_err());
    }

    #[tokio::test]
    async fn settings_round_trip() {
        let mut sim = connect();
        let original = sim.settings().await.unwrap();
        assert!(!original.synchronous_mode);

        sim.apply_settings(&WorldSettings::stepped(0.05)).await.unwrap();
        assert_eq!(sim.settings().await.unwrap(), WorldSettings::stepped(0.05));
        assert!(sim.apply_settings(&WorldSettings::stepped(0.0)).await.is_err());
    }

    #[test]
    fn test_pattern_has_expected_size_and_moves() {
        let a = render_test_pattern(32, 8, 0);
        let b = render_test_pattern(32, 8, 1);
        assert_eq!(a.len(), 32 * 8 * 4);
        assert_ne!(a, b);
    }
}
