//! Wire format for the frame stream.
//!
//! One published item is exactly two parts on the wire:
//!
//! 1. Metadata: a JSON object `{"width": u32, "height": u32, "frame_index": u64}`
//! 2. Payload: `width * height * 4` raw BGRA bytes, row-major, no padding
//!
//! [`codec`] maps frames to and from that pair; [`framing`] puts the parts on
//! a byte stream. Both ends of a connection must agree bit for bit, which is
//! why the metadata is a fixed-schema record rather than a language-specific
//! object dump.

pub mod codec;
pub mod framing;

pub use codec::{decode, decode_metadata, encode};
pub use framing::{FLAG_MORE, message_from_parts, read_parts, write_message, write_parts};
