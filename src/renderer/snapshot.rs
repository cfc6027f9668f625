//! Renderer that writes frames to disk as PNG images
//!
//! Each file is encoded to a temporary name first and renamed into place, so
//! a viewer polling `latest.png` never sees a half-written image. Numbered
//! snapshots carry the overlay text in their file name.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use image::{ColorType, ImageFormat};
use tracing::{debug, trace, warn};

use super::Renderer;
use crate::types::Frame;
use crate::{Result, StreamError};

const LATEST: &str = "latest.png";

/// Writes shown frames into a directory
pub struct SnapshotRenderer {
    dir: PathBuf,
    numbered: bool,
    written: u64,
    quit_after: Option<u64>,
    /// Temporary file of a write that has not been renamed yet
    pending_tmp: Option<PathBuf>,
}

impl SnapshotRenderer {
    /// Create the renderer, creating `dir` if needed
    ///
    /// With `numbered` every frame gets its own `frame_<index>[_<overlay>].png`;
    /// otherwise `latest.png` is overwritten.
    pub fn create(dir: &Path, numbered: bool) -> Result<Self> {
        fs::create_dir_all(dir)
            .map_err(|e| StreamError::io(format!("creating snapshot directory {}", dir.display()), e))?;
        debug!(dir = %dir.display(), numbered, "Snapshot renderer ready");
        Ok(Self { dir: dir.to_path_buf(), numbered, written: 0, quit_after: None, pending_tmp: None })
    }

    /// Request quit after `frames` written frames
    pub fn quit_after(mut self, frames: Option<u64>) -> Self {
        self.quit_after = frames;
        self
    }

    /// Path a frame shown with `overlay` will be written to
    pub fn path_for(&self, frame: &Frame, overlay: Option<&str>) -> PathBuf {
        if !self.numbered {
            return self.dir.join(LATEST);
        }
        match overlay.map(file_label).filter(|label| !label.is_empty()) {
            Some(label) => self.dir.join(format!("frame_{:08}_{}.png", frame.frame_index(), label)),
            None => self.dir.join(format!("frame_{:08}.png", frame.frame_index())),
        }
    }

    /// Frames written so far
    pub fn written(&self) -> u64 {
        self.written
    }
}

/// Lowercase ASCII alphanumerics, every other run collapsed to one `_`
fn file_label(overlay: &str) -> String {
    let mut label = String::with_capacity(overlay.len());
    for c in overlay.chars() {
        if c.is_ascii_alphanumeric() {
            label.push(c.to_ascii_lowercase());
        } else if !label.is_empty() && !label.ends_with('_') {
            label.push('_');
        }
    }
    let trimmed = label.trim_end_matches('_').len();
    label.truncate(trimmed);
    label
}

impl Renderer for SnapshotRenderer {
    fn show(&mut self, frame: &Frame, overlay: Option<&str>) -> Result<()> {
        let path = self.path_for(frame, overlay);
        let tmp = path.with_extension("png.tmp");
        self.pending_tmp = Some(tmp.clone());

        image::save_buffer_with_format(
            &tmp,
            &frame.to_rgb(),
            frame.width(),
            frame.height(),
            ColorType::Rgb8,
            ImageFormat::Png,
        )
        .map_err(|e| StreamError::render(format!("encoding {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| StreamError::render(format!("writing {}: {}", path.display(), e)))?;
        self.pending_tmp = None;

        self.written += 1;
        trace!(path = %path.display(), frame_index = frame.frame_index(), overlay, "Snapshot written");
        Ok(())
    }

    fn poll_quit(&mut self) -> bool {
        self.quit_after.is_some_and(|limit| self.written >= limit)
    }

    fn close_all(&mut self) {
        let Some(tmp) = self.pending_tmp.take() else {
            return;
        };
        match fs::remove_file(&tmp) {
            Ok(()) => debug!(path = %tmp.display(), "Removed unfinished snapshot"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %tmp.display(), error = %e, "Failed to remove unfinished snapshot"),
        }
    }
}
