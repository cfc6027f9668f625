//! Camera frame type shared by producer and consumers

use std::fmt;
use std::sync::Arc;

use crate::{Result, StreamError};

/// Bytes per pixel in the interleaved BGRA buffer.
pub const BYTES_PER_PIXEL: usize = 4;

/// A single rendered camera frame.
///
/// This is the fundamental data unit that flows through the system, from the
/// simulator's sensor callback to the renderer. The pixel buffer is shared
/// via `Arc`, so cloning a frame or encoding it for the wire never copies
/// pixel data.
///
/// A `Frame` always satisfies `pixels.len() == width * height * 4` with
/// non-zero dimensions; [`Frame::new`] refuses anything else.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    frame_index: u64,
    pixels: Arc<[u8]>,
}

impl Frame {
    /// Create a frame from a BGRA pixel buffer.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Decode`] if either dimension is zero or the buffer
    /// length is not exactly `width * height * 4`.
    pub fn new(
        width: u32,
        height: u32,
        frame_index: u64,
        pixels: impl Into<Arc<[u8]>>,
    ) -> Result<Self> {
        let pixels = pixels.into();
        let expected = expected_len(width, height)?;
        if pixels.len() != expected {
            return Err(StreamError::decode(format!(
                "pixel buffer is {} bytes, expected {} for {}x{} BGRA",
                pixels.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self { width, height, frame_index, pixels })
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Simulation frame counter at capture time.
    ///
    /// Informational only; consumers never reorder by it.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Raw BGRA pixel bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Shared handle to the pixel buffer.
    pub fn shared_pixels(&self) -> Arc<[u8]> {
        Arc::clone(&self.pixels)
    }

    /// One row of BGRA pixels.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let stride = self.width as usize * BYTES_PER_PIXEL;
        let start = y as usize * stride;
        self.pixels.get(start..start + stride)
    }

    /// BGRA value of a single pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width {
            return None;
        }
        let row = self.row(y)?;
        let start = x as usize * BYTES_PER_PIXEL;
        let px = row.get(start..start + BYTES_PER_PIXEL)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Convert to packed RGB, dropping the alpha channel.
    pub fn to_rgb(&self) -> Vec<u8> {
        let mut rgb = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for px in self.pixels.chunks_exact(BYTES_PER_PIXEL) {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        rgb
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("frame_index", &self.frame_index)
            .field("pixels", &format_args!("<{} bytes>", self.pixels.len()))
            .finish()
    }
}

/// Expected BGRA buffer length for the given dimensions.
///
/// Fails on zero dimensions or when the product does not fit in `usize`.
pub fn expected_len(width: u32, height: u32) -> Result<usize> {
    if width == 0 || height == 0 {
        return Err(StreamError::decode(format!(
            "frame dimensions must be non-zero, got {}x{}",
            width, height
        )));
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(BYTES_PER_PIXEL))
        .ok_or_else(|| {
            StreamError::decode(format!("frame dimensions {}x{} overflow", width, height))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        let mut pixels = Vec::new();
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[x as u8, y as u8, 0x80, 0xFF]);
            }
        }
        pixels
    }

    #[test]
    fn new_accepts_exact_buffer() {
        let frame = Frame::new(3, 2, 7, gradient(3, 2)).expect("valid frame");
        assert_eq!(frame.width(), 3);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.frame_index(), 7);
        assert_eq!(frame.pixels().len(), 24);
    }

    #[test]
    fn new_rejects_length_mismatch() {
        let err = Frame::new(3, 2, 0, vec![0u8; 23]).unwrap_err();
        assert!(err.is_per_message());
        assert!(err.to_string().contains("23 bytes"));
    }

    #[test]
    fn new_rejects_zero_dimensions() {
        assert!(Frame::new(0, 2, 0, Vec::new()).is_err());
        assert!(Frame::new(2, 0, 0, Vec::new()).is_err());
    }

    #[test]
    fn pixel_and_row_access() {
        let frame = Frame::new(3, 2, 0, gradient(3, 2)).unwrap();

        assert_eq!(frame.pixel(2, 1), Some([2, 1, 0x80, 0xFF]));
        assert_eq!(frame.pixel(3, 0), None);
        assert_eq!(frame.pixel(0, 2), None);
        assert_eq!(frame.row(1).map(<[u8]>::len), Some(12));
        assert!(frame.row(2).is_none());
    }

    #[test]
    fn to_rgb_swaps_channels_and_drops_alpha() {
        let frame = Frame::new(1, 1, 0, vec![10u8, 20, 30, 255]).unwrap();
        assert_eq!(frame.to_rgb(), vec![30, 20, 10]);
    }

    #[test]
    fn clones_share_the_pixel_buffer() {
        let frame = Frame::new(2, 2, 1, gradient(2, 2)).unwrap();
        let copy = frame.clone();
        assert!(Arc::ptr_eq(&frame.shared_pixels(), &copy.shared_pixels()));
        assert_eq!(frame, copy);
    }

    #[test]
    fn debug_output_elides_pixels() {
        let frame = Frame::new(2, 2, 1, gradient(2, 2)).unwrap();
        let rendered = format!("{:?}", frame);
        assert!(rendered.contains("<16 bytes>"));
    }
}
