//! Stream camera frames from a stepped simulation to any number of viewers.
//!
//! simcast runs a simulator in fixed-step mode, attaches an RGB camera to a
//! traffic light, and publishes every captured frame as a two-part message
//! (JSON metadata plus raw BGRA pixels) over a TCP pub/sub transport.
//! Subscribers connect at any time, decode frames and render them.
//!
//! # Architecture
//!
//! - [`simulator`]: the [`Simulator`](simulator::Simulator) seam and its
//!   world/actor types; [`simulators::SyntheticSimulator`] is the built-in
//!   implementation
//! - [`session`]: scoped world settings and actor cleanup
//! - [`scenario`]: traffic spawning and camera attachment
//! - [`queue`] and [`driver`]: sensor thread to tick loop hand-off
//! - [`wire`] and [`transport`]: message format and pub/sub sockets
//! - [`renderer`] and [`stream`]: subscriber-side display and rate limiting
//! - [`runner`]: the three run modes used by the `simcast` binary
//!
//! # Example
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use simcast::transport::{Subscriber, SubscriberOptions};
//! use simcast::Endpoint;
//!
//! #[tokio::main]
//! async fn main() -> simcast::Result<()> {
//!     let endpoint: Endpoint = "tcp://localhost:5555".parse()?;
//!     let subscriber = Subscriber::connect(&endpoint, SubscriberOptions::default()).await?;
//!     let mut frames = Box::pin(subscriber.frames());
//!
//!     while let Some(frame) = frames.next().await {
//!         println!("frame {} ({}x{})", frame.frame_index(), frame.width(), frame.height());
//!     }
//!     Ok(())
//! }
//! ```

mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

pub mod config;
pub mod queue;
pub mod simulator;
pub mod simulators;
pub mod wire;

pub mod driver;
pub mod renderer;
pub mod runner;
pub mod scenario;
pub mod session;
pub mod stream;
pub mod transport;

pub use error::*;
pub use types::*;

pub use config::Config;
pub use queue::{FrameQueue, FrameSink};
pub use simulators::SyntheticSimulator;
pub use transport::{Publisher, Subscriber};
