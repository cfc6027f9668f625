//! Multipart message framing over a byte stream
//!
//! Each part is prefixed by a five byte header:
//!
//! ```text
//! ┌─────────────┬──────────────────────┬──────────────────┐
//! │ Flags (1 B) │ Length (4 B, BE u32) │ Body (Length B)  │
//! └─────────────┴──────────────────────┴──────────────────┘
//! ```
//!
//! Flag bit 0 (`MORE`) means another part of the same message follows. The
//! remaining flag bits are reserved and must be zero. A message is the run of
//! parts up to and including the first part without `MORE`.
//!
//! Oversized parts, reserved flag bits and messages with too many parts are
//! protocol violations; the reader cannot resynchronise after one, so the
//! connection is dropped.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::types::WireMessage;
use crate::{Result, StreamError};

/// Flag bit: more parts follow in this message
pub const FLAG_MORE: u8 = 0x01;

/// Header bytes preceding each part
pub const PART_HEADER_LEN: usize = 5;

/// Upper bound on parts per message accepted by readers
pub const MAX_PARTS: usize = 16;

/// Write one multipart message.
///
/// The caller is responsible for flushing buffered writers.
pub async fn write_parts<W>(writer: &mut W, parts: &[&[u8]]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if parts.is_empty() {
        return Err(StreamError::protocol("cannot send a message with no parts"));
    }

    for (i, part) in parts.iter().enumerate() {
        let len = u32::try_from(part.len()).map_err(|_| {
            StreamError::protocol(format!("part of {} bytes exceeds u32 length field", part.len()))
        })?;
        let flags = if i + 1 < parts.len() { FLAG_MORE } else { 0 };

        let mut header = [0u8; PART_HEADER_LEN];
        header[0] = flags;
        header[1..].copy_from_slice(&len.to_be_bytes());

        writer.write_all(&header).await.map_err(|e| StreamError::io("writing part header", e))?;
        writer.write_all(part).await.map_err(|e| StreamError::io("writing part body", e))?;
    }

    Ok(())
}

/// Write a two-part frame message (metadata, payload)
pub async fn write_message<W>(writer: &mut W, message: &WireMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_parts(writer, &[message.metadata.as_slice(), &message.payload[..]]).await
}

/// Read one multipart message.
///
/// Returns `Ok(None)` on a clean end of stream between messages. A stream that
/// ends inside a message is an I/O error.
pub async fn read_parts<R>(reader: &mut R, max_part_len: usize) -> Result<Option<Vec<Vec<u8>>>>
where
    R: AsyncRead + Unpin,
{
    let mut parts = Vec::with_capacity(2);

    loop {
        let mut header = [0u8; PART_HEADER_LEN];

        if parts.is_empty() {
            // Distinguish a clean close from a truncated header.
            let n = reader.read(&mut header[..1]).await.map_err(|e| StreamError::io("reading part header", e))?;
            if n == 0 {
                return Ok(None);
            }
            reader
                .read_exact(&mut header[1..])
                .await
                .map_err(|e| StreamError::io("reading part header", e))?;
        } else {
            reader.read_exact(&mut header).await.map_err(|e| StreamError::io("reading part header", e))?;
        }

        let flags = header[0];
        if flags & !FLAG_MORE != 0 {
            return Err(StreamError::protocol(format!("reserved flag bits set: {:#04x}", flags)));
        }

        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if len > max_part_len {
            return Err(StreamError::protocol(format!(
                "part of {} bytes exceeds limit of {} bytes",
                len, max_part_len
            )));
        }

        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await.map_err(|e| StreamError::io("reading part body", e))?;
        parts.push(body);

        if flags & FLAG_MORE == 0 {
            return Ok(Some(parts));
        }
        if parts.len() >= MAX_PARTS {
            return Err(StreamError::protocol(format!("message exceeds {} parts", MAX_PARTS)));
        }
    }
}

/// Interpret received parts as a frame message.
///
/// Anything other than exactly two parts is a per-message decode error.
pub fn message_from_parts(mut parts: Vec<Vec<u8>>) -> Result<WireMessage> {
    if parts.len() != 2 {
        return Err(StreamError::decode(format!("expected 2 message parts, got {}", parts.len())));
    }
    let payload = parts.pop().unwrap_or_default();
    let metadata = parts.pop().unwrap_or_default();
    Ok(WireMessage::new(metadata, payload))
}
