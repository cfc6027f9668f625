//! Scenario staging: background traffic plus a camera on a traffic light
//!
//! Runs inside a [`SimSession`] so everything spawned here is tracked and
//! destroyed on teardown, including when staging itself fails halfway.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::config::ScenarioConfig;
use crate::queue::FrameSink;
use crate::session::SimSession;
use crate::simulator::{ActorId, Blueprint, Simulator};
use crate::{Result, StreamError};

/// Actors created by [`stage`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedScenario {
    /// The camera sensor feeding the frame queue
    pub camera: ActorId,
    /// The actor the camera is attached to
    pub attached_to: ActorId,
    /// Traffic vehicles that were actually placed
    pub vehicles: Vec<ActorId>,
}

/// Spawn traffic, attach the camera and route its frames into `sink`
///
/// # Errors
///
/// [`StreamError::NoAttachmentTarget`] when no actor matches
/// `config.attach_pattern`, plus any simulator failure.
pub async fn stage<S: Simulator>(
    session: &mut SimSession<S>,
    config: &ScenarioConfig,
    sink: FrameSink,
) -> Result<StagedScenario> {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    session.simulator().set_traffic_manager_sync(config.traffic_manager_port, true).await?;
    let vehicles = spawn_traffic(session, config, &mut rng).await?;
    info!(requested = config.vehicles, spawned = vehicles.len(), "Spawned traffic vehicles");

    let targets = session.simulator().find_actors(&config.attach_pattern).await?;
    let Some(&attached_to) = targets.first() else {
        warn!(pattern = %config.attach_pattern, "No traffic lights found");
        return Err(StreamError::no_attachment_target(&config.attach_pattern));
    };

    let camera_config = &config.camera;
    let blueprint = Blueprint::new(&camera_config.blueprint)
        .with_attribute("image_size_x", camera_config.width)
        .with_attribute("image_size_y", camera_config.height);
    let camera = session.spawn(&blueprint, camera_config.transform, Some(attached_to)).await?;

    session
        .simulator()
        .register_frame_callback(camera, Box::new(move |frame| sink.push(frame)))?;

    info!(
        camera = %camera,
        attached_to = %attached_to,
        width = camera_config.width,
        height = camera_config.height,
        "Camera attached"
    );
    Ok(StagedScenario { camera, attached_to, vehicles })
}

async fn spawn_traffic<S: Simulator>(
    session: &mut SimSession<S>,
    config: &ScenarioConfig,
    rng: &mut StdRng,
) -> Result<Vec<ActorId>> {
    if config.vehicles == 0 {
        return Ok(Vec::new());
    }

    let blueprints = session.simulator().blueprints(&config.vehicle_filter).await?;
    let spawn_points = session.simulator().spawn_points().await?;
    if blueprints.is_empty() || spawn_points.is_empty() {
        warn!(
            filter = %config.vehicle_filter,
            blueprints = blueprints.len(),
            spawn_points = spawn_points.len(),
            "Nothing to spawn traffic with"
        );
        return Ok(Vec::new());
    }

    let mut vehicles = Vec::new();
    for _ in 0..config.vehicles {
        let (Some(blueprint), Some(spawn_point)) = (blueprints.choose(rng), spawn_points.choose(rng)) else {
            break;
        };
        match session.try_spawn(blueprint, *spawn_point, None).await? {
            Some(vehicle) => {
                session.simulator().set_autopilot(vehicle, true).await?;
                vehicles.push(vehicle);
            }
            None => debug!(blueprint = %blueprint.id, "Spawn point occupied, skipping"),
        }
    }
    Ok(vehicles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::FrameQueue;
    use crate::session;
    use crate::test_utils::ScriptedSimulator;
    use futures::FutureExt;

    fn seeded(vehicles: usize) -> ScenarioConfig {
        ScenarioConfig { vehicles, seed: Some(7), ..ScenarioConfig::default() }
    }

    #[tokio::test]
    async fn stages_traffic_and_camera() {
        let sim = ScriptedSimulator::new();
        let log = sim.log();
        let queue = FrameQueue::unbounded();
        let sink = queue.sink();
        let config = seeded(50);

        let staged = session::scoped(sim, 0.05, |session| {
            async move {
                let staged = stage(session, &config, sink).await?;
                session.simulator().step().await?;
                assert_eq!(session.tracked().len(), staged.vehicles.len() + 1);
                Ok(staged)
            }
            .boxed()
        })
        .await
        .unwrap();

        // Ten spawn points, so at most ten vehicles fit.
        assert!(!staged.vehicles.is_empty() && staged.vehicles.len() <= 10);

        let log = log.lock();
        assert_eq!(log.traffic_manager, vec![(8000, true)]);
        assert_eq!(log.autopilot, staged.vehicles);

        let (camera_bp, parent, transform) = log.spawned.last().unwrap().clone();
        assert_eq!(camera_bp.id, "sensor.camera.rgb");
        assert_eq!(camera_bp.attribute("image_size_x"), Some("800"));
        assert_eq!(camera_bp.attribute("image_size_y"), Some("600"));
        assert_eq!(parent, Some(staged.attached_to));
        assert_eq!(transform.location.z, 4.0);
        assert_eq!((transform.rotation.yaw, transform.rotation.pitch), (90.0, -25.0));

        let frame = queue.try_pop().expect("camera frame after one step");
        assert_eq!((frame.width(), frame.height(), frame.frame_index()), (800, 600, 0));

        // Vehicles and camera are destroyed together.
        assert_eq!(log.destroy_calls.len(), 1);
        assert_eq!(log.destroy_calls[0].len(), staged.vehicles.len() + 1);
    }

    #[tokio::test]
    async fn same_seed_same_traffic() {
        let mut runs = Vec::new();
        for _ in 0..2 {
            let sim = ScriptedSimulator::new();
            let log = sim.log();
            let config = seeded(6);
            let sink = FrameQueue::unbounded().sink();
            session::scoped(sim, 0.05, |session| {
                async move { stage(session, &config, sink).await.map(|_| ()) }.boxed()
            })
            .await
            .unwrap();
            let spawned: Vec<_> =
                log.lock().spawned.iter().map(|(bp, _, t)| (bp.id.clone(), t.location.x)).collect();
            runs.push(spawned);
        }
        assert_eq!(runs[0], runs[1]);
    }

    #[tokio::test]
    async fn missing_traffic_light_is_fatal_and_cleans_up() {
        let sim = ScriptedSimulator::new().with_traffic_lights(0);
        let log = sim.log();
        let config = seeded(3);
        let sink = FrameQueue::unbounded().sink();

        let err = session::scoped(sim, 0.05, |session| {
            async move { stage(session, &config, sink).await.map(|_| ()) }.boxed()
        })
        .await
        .unwrap_err();

        assert!(matches!(err, StreamError::NoAttachmentTarget { .. }));
        let log = log.lock();
        // Vehicles spawned before the failure are still destroyed.
        assert_eq!(log.destroy_calls.len(), 1);
        assert_eq!(log.destroy_calls[0].len(), log.autopilot.len());
        assert!(log.spawned.iter().all(|(bp, _, _)| bp.id.starts_with("vehicle.")));
    }

    #[tokio::test]
    async fn zero_vehicles_skips_traffic() {
        let sim = ScriptedSimulator::new();
        let log = sim.log();
        let config = seeded(0);
        let sink = FrameQueue::unbounded().sink();

        let staged = session::scoped(sim, 0.05, |session| {
            async move { stage(session, &config, sink).await }.boxed()
        })
        .await
        .unwrap();

        assert!(staged.vehicles.is_empty());
        assert_eq!(log.lock().spawned.len(), 1);
    }
}
