//! Core types for frame streaming.
//!
//! - [`Frame`] is a validated camera frame with a shared BGRA buffer
//! - [`Metadata`] and [`WireMessage`] are the two-part wire representation
//! - [`Endpoint`] is a `tcp://host:port` transport address
//! - [`UpdateRate`] caps how often subscribers render
//!
//! ```rust
//! use simcast::types::{Frame, Metadata};
//!
//! let frame = Frame::new(2, 1, 42, vec![0u8; 8]).unwrap();
//! let metadata = Metadata::from(&frame);
//! assert_eq!((metadata.width, metadata.height, metadata.frame_index), (2, 1, 42));
//! ```

mod endpoint;
mod frame;
mod metadata;
mod update_rate;

pub use endpoint::{DEFAULT_PORT, Endpoint, WILDCARD_HOST};
pub use frame::{BYTES_PER_PIXEL, Frame, expected_len};
pub use metadata::{Metadata, WireMessage};
pub use update_rate::UpdateRate;
