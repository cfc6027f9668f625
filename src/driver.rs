//! Tick driver for the producer side
//!
//! The driver owns the simulation clock. Every iteration it advances the
//! world by exactly one step and then looks into the [`FrameQueue`] exactly
//! once, without waiting. A frame that has not arrived yet is simply picked up
//! on a later tick; the loop never stalls on the sensor.

use std::ops::ControlFlow;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::queue::{FrameQueue, FrameSink};
use crate::renderer::{Renderer, frame_overlay};
use crate::simulator::Simulator;
use crate::transport::Publisher;
use crate::types::Frame;
use crate::Result;

/// Where the driver is within a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Waiting for the simulator to finish a step
    Stepping,
    /// Taking at most one frame from the queue
    Draining,
    /// Loop has ended
    Stopped,
}

/// Why the loop ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The cancellation token fired (Ctrl-C)
    Cancelled,
    /// The consumer asked to stop (quit key)
    ConsumerRequested,
    /// The configured number of ticks has run
    TickLimit,
}

/// Loop counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub ticks: u64,
    pub frames_delivered: u64,
    /// Ticks after which the queue was empty
    pub empty_drains: u64,
}

/// Receives each frame the driver takes from the queue
pub trait FrameConsumer: Send {
    /// Handle one frame; `Break` stops the loop
    fn consume(&mut self, frame: Frame) -> Result<ControlFlow<()>>;
}

/// Steps a simulator and feeds queued frames to a consumer
pub struct TickDriver {
    queue: FrameQueue,
    cancel: CancellationToken,
    max_ticks: Option<u64>,
    state: DriverState,
    stats: DriverStats,
}

impl TickDriver {
    /// Driver over `queue` that stops when `cancel` fires
    pub fn new(queue: FrameQueue, cancel: CancellationToken) -> Self {
        Self { queue, cancel, max_ticks: None, state: DriverState::Stopped, stats: DriverStats::default() }
    }

    /// Stop after `max_ticks` steps
    pub fn with_max_ticks(mut self, max_ticks: Option<u64>) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    /// Producer handle for the simulator's frame callback
    pub fn sink(&self) -> FrameSink {
        self.queue.sink()
    }

    /// Current state
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Counters so far
    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    /// Run until cancelled, the consumer stops, or the tick limit is reached
    ///
    /// Simulator and consumer errors end the loop and are returned. A step
    /// in progress is never interrupted; cancellation is observed between
    /// ticks.
    pub async fn run<S, C>(&mut self, sim: &mut S, consumer: &mut C) -> Result<StopReason>
    where
        S: Simulator + ?Sized,
        C: FrameConsumer + ?Sized,
    {
        info!(max_ticks = ?self.max_ticks, "Tick loop started");
        let result = self.run_loop(sim, consumer).await;
        self.state = DriverState::Stopped;

        info!(
            ticks = self.stats.ticks,
            frames = self.stats.frames_delivered,
            empty = self.stats.empty_drains,
            dropped = self.queue.dropped(),
            "Tick loop stopped"
        );
        result
    }

    async fn run_loop<S, C>(&mut self, sim: &mut S, consumer: &mut C) -> Result<StopReason>
    where
        S: Simulator + ?Sized,
        C: FrameConsumer + ?Sized,
    {
        loop {
            if self.cancel.is_cancelled() {
                debug!("Tick loop cancelled");
                return Ok(StopReason::Cancelled);
            }
            if self.max_ticks.is_some_and(|max| self.stats.ticks >= max) {
                return Ok(StopReason::TickLimit);
            }

            self.state = DriverState::Stepping;
            let frame_index = sim.step().await?;
            self.stats.ticks += 1;

            self.state = DriverState::Draining;
            match self.queue.try_pop() {
                Some(frame) => {
                    self.stats.frames_delivered += 1;
                    if consumer.consume(frame)?.is_break() {
                        debug!("Consumer requested stop");
                        return Ok(StopReason::ConsumerRequested);
                    }
                }
                None => {
                    self.stats.empty_drains += 1;
                    trace!(frame_index, "No frame ready after step");
                }
            }

            // Let the cancellation task run even if the simulator never yields.
            tokio::task::yield_now().await;
        }
    }
}

/// Encodes frames and hands them to a [`Publisher`]
pub struct PublishingConsumer {
    publisher: Publisher,
    published: u64,
}

impl PublishingConsumer {
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher, published: 0 }
    }

    /// Frames handed to the publisher
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Give the publisher back, e.g. to close it
    pub fn into_publisher(self) -> Publisher {
        self.publisher
    }
}

impl FrameConsumer for PublishingConsumer {
    fn consume(&mut self, frame: Frame) -> Result<ControlFlow<()>> {
        let outcome = self.publisher.publish_frame(&frame)?;
        self.published += 1;
        trace!(
            frame_index = frame.frame_index(),
            delivered = outcome.delivered,
            dropped = outcome.dropped,
            "Frame published"
        );
        Ok(ControlFlow::Continue(()))
    }
}

/// Shows frames locally with the `Frame: <index>` overlay
pub struct RenderingConsumer<R: Renderer> {
    renderer: R,
    overlay: bool,
}

impl<R: Renderer> RenderingConsumer<R> {
    pub fn new(renderer: R, overlay: bool) -> Self {
        Self { renderer, overlay }
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn into_renderer(self) -> R {
        self.renderer
    }
}

impl<R: Renderer> FrameConsumer for RenderingConsumer<R> {
    fn consume(&mut self, frame: Frame) -> Result<ControlFlow<()>> {
        let overlay = self.overlay.then(|| frame_overlay(&frame));
        self.renderer.show(&frame, overlay.as_deref())?;

        if self.renderer.poll_quit() {
            return Ok(ControlFlow::Break(()));
        }
        Ok(ControlFlow::Continue(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{Blueprint, Transform};
    use crate::test_utils::{RecordingRenderer, ScriptedSimulator};
    use crate::StreamError;

    struct Collect(Vec<u64>);

    impl FrameConsumer for Collect {
        fn consume(&mut self, frame: Frame) -> Result<ControlFlow<()>> {
            self.0.push(frame.frame_index());
            Ok(ControlFlow::Continue(()))
        }
    }

    async fn sim_with_camera(sim: ScriptedSimulator, sink: FrameSink) -> ScriptedSimulator {
        let mut sim = sim;
        let camera = Blueprint::new("sensor.camera.rgb")
            .with_attribute("image_size_x", 8)
            .with_attribute("image_size_y", 6);
        let sensor = sim.spawn(&camera, Transform::default(), None).await.unwrap();
        sim.register_frame_callback(sensor, Box::new(move |frame| sink.push(frame))).unwrap();
        sim
    }

    #[tokio::test]
    async fn one_step_and_one_pop_per_tick() {
        let mut driver = TickDriver::new(FrameQueue::unbounded(), CancellationToken::new()).with_max_ticks(Some(5));
        let mut sim = sim_with_camera(ScriptedSimulator::new().skip_frame(2), driver.sink()).await;
        let log = sim.log();
        let mut consumer = Collect(Vec::new());

        let reason = driver.run(&mut sim, &mut consumer).await.unwrap();

        assert_eq!(reason, StopReason::TickLimit);
        assert_eq!(log.lock().steps, 5);
        assert_eq!(consumer.0, vec![0, 1, 3, 4]);
        assert_eq!(
            driver.stats(),
            DriverStats { ticks: 5, frames_delivered: 4, empty_drains: 1 }
        );
        assert_eq!(driver.state(), DriverState::Stopped);
    }

    #[tokio::test]
    async fn cancelled_before_start_never_steps() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut driver = TickDriver::new(FrameQueue::unbounded(), cancel);
        let mut sim = ScriptedSimulator::new();
        let log = sim.log();

        let reason = driver.run(&mut sim, &mut Collect(Vec::new())).await.unwrap();
        assert_eq!(reason, StopReason::Cancelled);
        assert_eq!(log.lock().steps, 0);
    }

    #[tokio::test]
    async fn cancellation_from_another_task_stops_the_loop() {
        let cancel = CancellationToken::new();
        let mut driver = TickDriver::new(FrameQueue::unbounded(), cancel.clone());
        let mut sim = sim_with_camera(ScriptedSimulator::new(), driver.sink()).await;

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let reason = driver.run(&mut sim, &mut Collect(Vec::new())).await.unwrap();
        stopper.await.unwrap();

        assert_eq!(reason, StopReason::Cancelled);
        assert!(driver.stats().ticks > 0);
    }

    #[tokio::test]
    async fn step_error_ends_the_loop() {
        let mut driver = TickDriver::new(FrameQueue::unbounded(), CancellationToken::new());
        let mut sim = sim_with_camera(ScriptedSimulator::new().fail_step_at(3), driver.sink()).await;
        let mut consumer = Collect(Vec::new());

        let err = driver.run(&mut sim, &mut consumer).await.unwrap_err();
        assert!(matches!(err, StreamError::Simulator { .. }));
        assert_eq!(consumer.0, vec![0, 1, 2]);
        assert_eq!(driver.state(), DriverState::Stopped);
    }

    #[tokio::test]
    async fn rendering_consumer_overlays_and_quits() {
        let mut driver = TickDriver::new(FrameQueue::unbounded(), CancellationToken::new());
        let mut sim = sim_with_camera(ScriptedSimulator::new(), driver.sink()).await;
        let renderer = RecordingRenderer::new().quit_after(3);
        let shown = renderer.log();
        let mut consumer = RenderingConsumer::new(renderer, true);

        let reason = driver.run(&mut sim, &mut consumer).await.unwrap();

        assert_eq!(reason, StopReason::ConsumerRequested);
        let shown = shown.lock();
        assert_eq!(shown.shown.len(), 3);
        assert_eq!(shown.shown[2], (2, Some("Frame: 2".to_string())));
        assert_eq!(shown.last_size, Some((8, 6)));
    }
}
