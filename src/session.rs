//! Scoped simulator session
//!
//! A stepped client changes world-wide state: it switches the server to
//! synchronous mode and spawns actors. [`scoped`] guarantees both are undone
//! no matter how the body ends (success, error or panic). The original
//! settings are restored first, then every tracked actor is destroyed in a
//! single batch, exactly once.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, error, info, warn};

use crate::simulator::{ActorId, Blueprint, Simulator, Transform, WorldSettings};
use crate::Result;

/// A simulator in stepped mode plus the actors spawned through it
pub struct SimSession<S: Simulator> {
    sim: S,
    original: WorldSettings,
    actors: Vec<ActorId>,
    torn_down: bool,
}

impl<S: Simulator> SimSession<S> {
    /// Save the current settings and switch the world to stepped mode
    ///
    /// If switching fails the saved settings are re-applied best-effort and
    /// the error is returned.
    pub async fn begin(mut sim: S, fixed_delta_seconds: f64) -> Result<Self> {
        let original = sim.settings().await?;
        let stepped = WorldSettings::stepped(fixed_delta_seconds);

        if let Err(e) = sim.apply_settings(&stepped).await {
            if let Err(restore) = sim.apply_settings(&original).await {
                warn!("Failed to restore world settings after aborted start: {}", restore);
            }
            return Err(e);
        }

        info!(
            fixed_delta_seconds,
            frame_rate = 1.0 / fixed_delta_seconds,
            "World switched to stepped mode"
        );
        Ok(Self { sim, original, actors: Vec::new(), torn_down: false })
    }

    /// The underlying simulator
    pub fn simulator(&mut self) -> &mut S {
        &mut self.sim
    }

    /// Settings that teardown restores
    pub fn original_settings(&self) -> &WorldSettings {
        &self.original
    }

    /// Destroy `actor` on teardown
    pub fn track(&mut self, actor: ActorId) {
        self.actors.push(actor);
    }

    /// Actors that teardown will destroy
    pub fn tracked(&self) -> &[ActorId] {
        &self.actors
    }

    /// Spawn an actor and track it
    pub async fn spawn(
        &mut self,
        blueprint: &Blueprint,
        transform: Transform,
        attach_to: Option<ActorId>,
    ) -> Result<ActorId> {
        let actor = self.sim.spawn(blueprint, transform, attach_to).await?;
        self.track(actor);
        Ok(actor)
    }

    /// Try to spawn an actor, tracking it if it was placed
    pub async fn try_spawn(
        &mut self,
        blueprint: &Blueprint,
        transform: Transform,
        attach_to: Option<ActorId>,
    ) -> Result<Option<ActorId>> {
        let actor = self.sim.try_spawn(blueprint, transform, attach_to).await?;
        if let Some(actor) = actor {
            self.track(actor);
        }
        Ok(actor)
    }

    /// Restore the original settings and destroy tracked actors
    ///
    /// Runs once; later calls return `Ok(())`. Both steps are attempted even
    /// if the first fails, and the first failure is returned.
    pub async fn teardown(&mut self) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;
        info!("Cleaning up and restoring world settings");

        let mut first_error = None;
        if let Err(e) = self.sim.apply_settings(&self.original).await {
            error!("Failed to restore world settings: {}", e);
            first_error.get_or_insert(e);
        }

        let actors = std::mem::take(&mut self.actors);
        if !actors.is_empty() {
            match self.sim.destroy_batch(&actors).await {
                Ok(destroyed) if destroyed == actors.len() => {
                    debug!(destroyed, "Destroyed session actors");
                }
                Ok(destroyed) => {
                    warn!(requested = actors.len(), destroyed, "Some session actors were already gone");
                }
                Err(e) => {
                    error!(count = actors.len(), "Failed to destroy session actors: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        info!("Cleanup complete");
        first_error.map_or(Ok(()), Err)
    }

    /// Whether teardown has run
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

impl<S: Simulator> Drop for SimSession<S> {
    fn drop(&mut self) {
        if !self.torn_down {
            warn!(
                actors = self.actors.len(),
                "Simulator session dropped without teardown; world left in stepped mode"
            );
        }
    }
}

/// Run `body` inside a stepped session and always tear it down
///
/// The body's own error takes precedence over teardown errors. A panic in the
/// body is resumed after teardown has finished.
///
/// ```rust,no_run
/// use futures::FutureExt;
/// use simcast::session;
/// use simcast::simulator::Simulator;
/// use simcast::simulators::SyntheticSimulator;
///
/// # async fn demo() -> simcast::Result<()> {
/// let sim = SyntheticSimulator::connect("localhost", 2000, std::time::Duration::from_secs(10))?;
/// let _ticks = session::scoped(sim, 0.05, |session| {
///     async move {
///         for _ in 0..10 {
///             session.simulator().step().await?;
///         }
///         Ok(10)
///     }
///     .boxed()
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn scoped<S, T, F>(sim: S, fixed_delta_seconds: f64, body: F) -> Result<T>
where
    S: Simulator,
    F: for<'s> FnOnce(&'s mut SimSession<S>) -> BoxFuture<'s, Result<T>>,
{
    let mut session = SimSession::begin(sim, fixed_delta_seconds).await?;
    let outcome = AssertUnwindSafe(body(&mut session)).catch_unwind().await;
    let teardown = session.teardown().await;

    match outcome {
        Err(panic) => std::panic::resume_unwind(panic),
        Ok(Err(e)) => {
            if let Err(teardown_err) = teardown {
                warn!("Teardown also failed: {}", teardown_err);
            }
            Err(e)
        }
        Ok(Ok(value)) => teardown.map(|()| value),
    }
}
