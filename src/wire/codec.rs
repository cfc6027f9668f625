//! Frame ⇄ two-part wire message conversion

use tracing::trace;

use crate::types::{Frame, Metadata, WireMessage, expected_len};
use crate::{Result, StreamError};

/// Encode a frame into its wire form.
///
/// The payload shares the frame's pixel buffer, so no pixel bytes are copied.
pub fn encode(frame: &Frame) -> Result<WireMessage> {
    let metadata = serde_json::to_vec(&Metadata::from(frame))
        .map_err(|e| StreamError::decode(format!("metadata serialisation failed: {}", e)))?;
    Ok(WireMessage { metadata, payload: frame.shared_pixels() })
}

/// Parse the metadata part on its own
pub fn decode_metadata(bytes: &[u8]) -> Result<Metadata> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Decode a wire message back into a frame.
///
/// Metadata is parsed first, then the payload length is checked against
/// `width * height * 4`. Any mismatch rejects the whole message.
pub fn decode(message: &WireMessage) -> Result<Frame> {
    let metadata = decode_metadata(&message.metadata)?;
    let expected = expected_len(metadata.width, metadata.height)?;

    if message.payload.len() != expected {
        return Err(StreamError::decode(format!(
            "frame {} payload is {} bytes, expected {} for {}x{}",
            metadata.frame_index,
            message.payload.len(),
            expected,
            metadata.width,
            metadata.height
        )));
    }

    trace!(
        frame_index = metadata.frame_index,
        width = metadata.width,
        height = metadata.height,
        "Decoded frame"
    );

    Frame::new(metadata.width, metadata.height, metadata.frame_index, message.payload.clone())
}
