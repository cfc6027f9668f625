//! Renderer that reports frames through `tracing`

use tracing::{debug, info};

use super::Renderer;
use crate::types::Frame;
use crate::Result;

/// Logs one line per shown frame
///
/// Useful on headless machines and as the default display in tests.
pub struct LogRenderer {
    window: String,
    shown: u64,
    quit_after: Option<u64>,
    closed: bool,
}

impl LogRenderer {
    /// Renderer labelled `window`, quitting after `quit_after` frames if set
    pub fn new(window: &str, quit_after: Option<u64>) -> Self {
        Self { window: window.to_string(), shown: 0, quit_after, closed: false }
    }

    /// Frames shown so far
    pub fn shown(&self) -> u64 {
        self.shown
    }
}

impl Renderer for LogRenderer {
    fn show(&mut self, frame: &Frame, overlay: Option<&str>) -> Result<()> {
        self.shown += 1;
        info!(
            window = %self.window,
            width = frame.width(),
            height = frame.height(),
            frame_index = frame.frame_index(),
            overlay = overlay.unwrap_or(""),
            "Frame shown"
        );
        Ok(())
    }

    fn poll_quit(&mut self) -> bool {
        self.quit_after.is_some_and(|limit| self.shown >= limit)
    }

    fn close_all(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!(window = %self.window, shown = self.shown, "Closing windows");
        }
    }
}
