//! Wire message types

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::Frame;

/// Fixed-schema frame description sent as the first message part.
///
/// Serialised as a JSON object so that subscribers written in any language
/// can read it, e.g. `{"width":800,"height":600,"frame_index":42}`.
/// Unknown keys are ignored on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Simulation frame counter at capture time
    pub frame_index: u64,
}

impl From<&Frame> for Metadata {
    fn from(frame: &Frame) -> Self {
        Self { width: frame.width(), height: frame.height(), frame_index: frame.frame_index() }
    }
}

/// One published item: serialised metadata followed by the raw pixel payload.
///
/// The payload is the frame's own buffer, shared rather than copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    /// Serialised [`Metadata`]
    pub metadata: Vec<u8>,

    /// Raw BGRA pixels
    pub payload: Arc<[u8]>,
}

impl WireMessage {
    /// Create a message from its two parts
    pub fn new(metadata: Vec<u8>, payload: impl Into<Arc<[u8]>>) -> Self {
        Self { metadata, payload: payload.into() }
    }

    /// Total bytes on the wire, excluding framing headers
    pub fn len(&self) -> usize {
        self.metadata.len() + self.payload.len()
    }

    /// Whether both parts are empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
