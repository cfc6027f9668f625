//! Configuration for simcast runs
//!
//! Loaded from a YAML file; every field has a default so a partial (or
//! missing) file is fine. Command-line flags override file values.
//!
//! ```yaml
//! simulator:
//!   host: localhost
//!   port: 2000
//!   fixed_delta_seconds: 0.05
//! scenario:
//!   vehicles: 50
//!   camera:
//!     width: 800
//!     height: 600
//! transport:
//!   publish_endpoint: tcp://*:5555
//!   subscribe_endpoint: tcp://localhost:5555
//! render:
//!   renderer: snapshot
//!   snapshot_dir: ./frames
//! logging:
//!   level: info
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::simulator::{Location, Rotation, Transform};
use crate::transport::{PublisherOptions, SubscriberOptions};
use crate::types::{Endpoint, UpdateRate, expected_len};
use crate::{Result, StreamError};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub simulator: SimulatorConfig,
    pub scenario: ScenarioConfig,
    pub transport: TransportConfig,
    pub render: RenderConfig,
    pub logging: LoggingConfig,
}

/// Simulator connection and stepping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub host: String,
    pub port: u16,
    /// Connection timeout in seconds
    pub timeout_secs: f64,
    /// Simulated seconds per step (0.05 = 20 FPS)
    pub fixed_delta_seconds: f64,
    /// Stop after this many steps; runs until interrupted when unset
    pub max_ticks: Option<u64>,
    /// Frame queue capacity; unbounded when unset
    pub frame_queue_capacity: Option<usize>,
    /// Built-in simulator: pace steps to wall-clock `fixed_delta_seconds`
    pub realtime: bool,
    /// Built-in simulator: number of traffic lights on the map
    pub traffic_lights: usize,
    /// Built-in simulator: number of vehicle spawn points on the map
    pub spawn_points: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 2000,
            timeout_secs: 10.0,
            fixed_delta_seconds: 0.05,
            max_ticks: None,
            frame_queue_capacity: None,
            realtime: true,
            traffic_lights: 4,
            spawn_points: 60,
        }
    }
}

impl SimulatorConfig {
    /// Connection timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.0))
    }

    /// Frames per second implied by the step size
    pub fn frame_rate(&self) -> f64 {
        1.0 / self.fixed_delta_seconds
    }
}

/// What gets spawned before streaming starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Background traffic vehicles to attempt to spawn
    pub vehicles: usize,
    /// Blueprint pattern for traffic vehicles
    pub vehicle_filter: String,
    /// Traffic manager port
    pub traffic_manager_port: u16,
    /// Actor pattern the camera is attached to (first match wins)
    pub attach_pattern: String,
    /// Seed for spawn choices; random when unset
    pub seed: Option<u64>,
    pub camera: CameraConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            vehicles: 50,
            vehicle_filter: "vehicle.*".to_string(),
            traffic_manager_port: 8000,
            attach_pattern: "traffic.traffic_light*".to_string(),
            seed: None,
            camera: CameraConfig::default(),
        }
    }
}

/// Camera sensor placement and resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub blueprint: String,
    pub width: u32,
    pub height: u32,
    /// Placement relative to the attachment target
    pub transform: Transform,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            blueprint: "sensor.camera.rgb".to_string(),
            width: 800,
            height: 600,
            transform: Transform {
                location: Location { x: 0.0, y: 0.0, z: 4.0 },
                rotation: Rotation { pitch: -25.0, yaw: 90.0, roll: 0.0 },
            },
        }
    }
}

/// Pub/sub endpoints and transport limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub publish_endpoint: Endpoint,
    pub subscribe_endpoint: Endpoint,
    /// Messages queued per subscriber before new ones are dropped
    pub send_high_water_mark: usize,
    /// Largest accepted message part in bytes
    pub max_part_bytes: usize,
    /// Delay between subscriber reconnection attempts
    pub reconnect_interval_ms: u64,
    /// How long `close` waits for queued messages to go out
    pub linger_ms: u64,
    /// Metadata prefix filter; empty receives everything
    pub topic: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            publish_endpoint: Endpoint::default_bind(),
            subscribe_endpoint: Endpoint::default_connect(),
            send_high_water_mark: 1000,
            max_part_bytes: 64 * 1024 * 1024,
            reconnect_interval_ms: 100,
            linger_ms: 1000,
            topic: String::new(),
        }
    }
}

impl TransportConfig {
    /// Options for binding a publisher
    pub fn publisher_options(&self) -> PublisherOptions {
        PublisherOptions {
            send_high_water_mark: self.send_high_water_mark,
            linger: Duration::from_millis(self.linger_ms),
        }
    }

    /// Options for connecting a subscriber
    pub fn subscriber_options(&self) -> SubscriberOptions {
        SubscriberOptions {
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            max_part_bytes: self.max_part_bytes,
        }
    }
}

/// Which renderer displays frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RendererKind {
    /// Log a line per frame
    #[default]
    Log,
    /// Write PNG images to `snapshot_dir`
    Snapshot,
}

/// Display settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub renderer: RendererKind,
    pub window_name: String,
    pub snapshot_dir: Option<PathBuf>,
    /// Keep every snapshot instead of overwriting `latest.png`
    pub numbered_snapshots: bool,
    /// Draw the `Frame: <index>` overlay
    pub overlay: bool,
    /// Stop after this many rendered frames (stands in for the quit key)
    pub quit_after: Option<u64>,
    /// Subscriber render cap in Hz
    pub max_rate_hz: Option<u32>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            renderer: RendererKind::Log,
            window_name: "Traffic light camera".to_string(),
            snapshot_dir: None,
            numbered_snapshots: false,
            overlay: true,
            quit_after: None,
            max_rate_hz: None,
        }
    }
}

impl RenderConfig {
    /// Render rate for subscriber streams
    pub fn update_rate(&self) -> UpdateRate {
        UpdateRate::from_hz(self.max_rate_hz)
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl Config {
    /// Load and validate configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| StreamError::io(format!("reading {}", path.display()), e))?;
        let config = Self::from_yaml(&raw).map_err(|e| match e {
            StreamError::Config { details, .. } => {
                StreamError::config(Some(path.to_path_buf()), details)
            }
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(raw: &str) -> Result<Self> {
        // An empty document means "all defaults".
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config =
            serde_yaml_ng::from_str(raw).map_err(|e| StreamError::config(None, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let invalid = |details: String| Err(StreamError::config(None, details));

        if !(self.simulator.fixed_delta_seconds > 0.0) {
            return invalid(format!(
                "simulator.fixed_delta_seconds must be positive, got {}",
                self.simulator.fixed_delta_seconds
            ));
        }
        if self.simulator.frame_queue_capacity == Some(0) {
            return invalid("simulator.frame_queue_capacity must be at least 1".to_string());
        }

        let camera = &self.scenario.camera;
        let frame_bytes = expected_len(camera.width, camera.height).map_err(|_| {
            StreamError::config(
                None,
                format!("scenario.camera size {}x{} is not valid", camera.width, camera.height),
            )
        })?;

        if self.transport.send_high_water_mark == 0 {
            return invalid("transport.send_high_water_mark must be at least 1".to_string());
        }
        if self.transport.max_part_bytes < frame_bytes {
            return invalid(format!(
                "transport.max_part_bytes ({}) is smaller than one {}x{} frame ({} bytes)",
                self.transport.max_part_bytes, camera.width, camera.height, frame_bytes
            ));
        }
        if self.render.renderer == RendererKind::Snapshot && self.render.snapshot_dir.is_none() {
            return invalid("render.snapshot_dir is required for the snapshot renderer".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_setup() {
        let config = Config::default();
        assert_eq!(config.simulator.port, 2000);
        assert_eq!(config.simulator.fixed_delta_seconds, 0.05);
        assert_eq!(config.scenario.vehicles, 50);
        assert_eq!(config.scenario.traffic_manager_port, 8000);
        assert_eq!((config.scenario.camera.width, config.scenario.camera.height), (800, 600));
        assert_eq!(config.transport.publish_endpoint.to_string(), "tcp://*:5555");
        assert_eq!(config.transport.subscribe_endpoint.to_string(), "tcp://localhost:5555");
        assert!(config.transport.topic.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let config = Config::from_yaml(
            "simulator:\n  fixed_delta_seconds: 0.1\nscenario:\n  vehicles: 5\n  camera:\n    width: 320\n    height: 240\n",
        )
        .unwrap();

        assert_eq!(config.simulator.fixed_delta_seconds, 0.1);
        assert_eq!(config.simulator.host, "localhost");
        assert_eq!(config.scenario.vehicles, 5);
        assert_eq!(config.scenario.camera.width, 320);
        assert_eq!(config.scenario.camera.blueprint, "sensor.camera.rgb");
        assert_eq!(config.scenario.camera.transform.location.z, 4.0);
    }

    #[test]
    fn empty_yaml_is_default() {
        assert_eq!(Config::from_yaml("  \n").unwrap(), Config::default());
    }

    #[test]
    fn endpoints_parse_from_yaml() {
        let config = Config::from_yaml(
            "transport:\n  publish_endpoint: tcp://127.0.0.1:6000\n  subscribe_endpoint: tcp://camera-host:6000\n",
        )
        .unwrap();
        assert_eq!(config.transport.publish_endpoint.port(), 6000);
        assert_eq!(config.transport.subscribe_endpoint.host(), "camera-host");

        assert!(Config::from_yaml("transport:\n  publish_endpoint: udp://x:1\n").is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        for yaml in [
            "simulator:\n  fixed_delta_seconds: 0\n",
            "scenario:\n  camera:\n    width: 0\n",
            "transport:\n  send_high_water_mark: 0\n",
            "transport:\n  max_part_bytes: 1024\n",
            "render:\n  renderer: snapshot\n",
        ] {
            let err = Config::from_yaml(yaml).unwrap_err();
            assert!(matches!(err, StreamError::Config { .. }), "{yaml} -> {err:?}");
        }
    }

    #[test]
    fn example_file_is_the_default_setup() {
        let config = Config::from_yaml(include_str!("../simcast.example.yaml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_reports_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simcast.yaml");
        fs::write(&path, "simulator:\n  port: not-a-port\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("simcast.yaml"));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = Config::load(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, StreamError::Io { .. }));
    }
}
