//! Run modes wiring the pieces together
//!
//! - [`run_publisher`]: stage the scenario, step the world, publish frames
//! - [`run_local`]: the same loop, rendering frames in-process instead
//! - [`run_subscriber`]: receive frames from a publisher and render them
//!
//! Producer modes run inside [`session::scoped`], so world settings and
//! spawned actors are cleaned up on every exit path. The publisher or
//! renderer is closed first, including when the loop panics.

use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;

use futures::{FutureExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{Config, RenderConfig};
pub use crate::driver::StopReason;
use crate::driver::{DriverStats, PublishingConsumer, RenderingConsumer, TickDriver};
use crate::queue::FrameQueue;
use crate::renderer::{Renderer, frame_overlay};
use crate::scenario::{self, StagedScenario};
use crate::session;
use crate::simulator::Simulator;
use crate::stream::ThrottleExt;
use crate::transport::{PublishStats, Publisher, Subscriber};
use crate::types::Frame;
use crate::Result;

/// Summary of a producer run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub stop: StopReason,
    pub driver: DriverStats,
    pub staged: StagedScenario,
    /// Publisher totals; `None` for local runs
    pub publish: Option<PublishStats>,
}

/// Summary of a subscriber run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberReport {
    pub stop: StopReason,
    pub frames_shown: u64,
    pub last_frame_index: Option<u64>,
}

/// Stage the scenario and publish every captured frame until stopped
///
/// The publisher is bound by the caller so bind errors surface before the
/// world is touched. It is closed before the session is torn down.
pub async fn run_publisher<S: Simulator>(
    sim: S,
    publisher: Publisher,
    config: &Config,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let queue = FrameQueue::with_capacity(config.simulator.frame_queue_capacity);
    let mut driver = TickDriver::new(queue, cancel).with_max_ticks(config.simulator.max_ticks);
    let scenario_config = config.scenario.clone();

    session::scoped(sim, config.simulator.fixed_delta_seconds, move |session| {
        async move {
            let mut consumer = PublishingConsumer::new(publisher);
            let outcome = AssertUnwindSafe(async {
                let staged = scenario::stage(session, &scenario_config, driver.sink()).await?;
                let stop = driver.run(session.simulator(), &mut consumer).await?;
                Ok::<_, crate::StreamError>((staged, stop))
            })
            .catch_unwind()
            .await;

            let publisher = consumer.into_publisher();
            let publish = publisher.stats();
            publisher.close().await;

            let (staged, stop) = outcome.unwrap_or_else(|payload| panic::resume_unwind(payload))?;
            Ok(RunReport { stop, driver: driver.stats(), staged, publish: Some(publish) })
        }
        .boxed()
    })
    .await
}

/// Stage the scenario and render frames locally until stopped
pub async fn run_local<S, R>(sim: S, renderer: R, config: &Config, cancel: CancellationToken) -> Result<RunReport>
where
    S: Simulator,
    R: Renderer + 'static,
{
    let queue = FrameQueue::with_capacity(config.simulator.frame_queue_capacity);
    let mut driver = TickDriver::new(queue, cancel).with_max_ticks(config.simulator.max_ticks);
    let scenario_config = config.scenario.clone();
    let overlay = config.render.overlay;

    session::scoped(sim, config.simulator.fixed_delta_seconds, move |session| {
        async move {
            let mut consumer = RenderingConsumer::new(renderer, overlay);
            let outcome = AssertUnwindSafe(async {
                let staged = scenario::stage(session, &scenario_config, driver.sink()).await?;
                let stop = driver.run(session.simulator(), &mut consumer).await?;
                Ok::<_, crate::StreamError>((staged, stop))
            })
            .catch_unwind()
            .await;

            consumer.renderer_mut().close_all();
            let (staged, stop) = outcome.unwrap_or_else(|payload| panic::resume_unwind(payload))?;
            Ok(RunReport { stop, driver: driver.stats(), staged, publish: None })
        }
        .boxed()
    })
    .await
}

/// Receive frames and render them until cancelled or the viewer quits
///
/// `source_hz` is the publisher's frame rate; a render cap at or above it
/// leaves the stream unthrottled.
pub async fn run_subscriber<R: Renderer>(
    mut subscriber: Subscriber,
    mut renderer: R,
    render: &RenderConfig,
    topic: &str,
    source_hz: f64,
    cancel: CancellationToken,
) -> Result<SubscriberReport> {
    subscriber.subscribe(topic.as_bytes());
    let frames = subscriber.frames();
    let mut frames: Pin<Box<dyn Stream<Item = Frame> + Send>> =
        match render.update_rate().throttle_interval(source_hz) {
            Some(interval) => {
                info!(interval = ?interval, "Throttling render rate");
                Box::pin(frames.throttle(interval))
            }
            None => Box::pin(frames),
        };

    let mut report = SubscriberReport { stop: StopReason::Cancelled, frames_shown: 0, last_frame_index: None };
    let result = loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break Ok(StopReason::Cancelled),
            frame = frames.next() => frame,
        };
        let Some(frame) = frame else {
            debug!("Frame stream ended");
            break Ok(StopReason::Cancelled);
        };

        let overlay = render.overlay.then(|| frame_overlay(&frame));
        if let Err(e) = renderer.show(&frame, overlay.as_deref()) {
            break Err(e);
        }
        report.frames_shown += 1;
        report.last_frame_index = Some(frame.frame_index());

        if renderer.poll_quit() {
            break Ok(StopReason::ConsumerRequested);
        }
    };

    info!("Closing windows");
    renderer.close_all();
    report.stop = result?;
    info!(frames = report.frames_shown, stop = ?report.stop, "Subscriber stopped");
    Ok(report)
}
