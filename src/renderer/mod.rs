//! Frame display
//!
//! A [`Renderer`] is whatever ends up showing frames to a person: a window, a
//! file on disk, a log line. The streaming loops only need three calls from
//! it and never hold on to a frame after `show` returns.

pub mod log;
pub mod snapshot;

pub use log::LogRenderer;
pub use snapshot::SnapshotRenderer;

use crate::config::{RenderConfig, RendererKind};
use crate::types::Frame;
use crate::Result;

/// Sink for frames that a person looks at
pub trait Renderer: Send {
    /// Display a frame, optionally with a text overlay
    fn show(&mut self, frame: &Frame, overlay: Option<&str>) -> Result<()>;

    /// Whether the viewer asked to stop (the quit key)
    fn poll_quit(&mut self) -> bool;

    /// Release every display resource; safe to call more than once
    fn close_all(&mut self);
}

impl<R: Renderer + ?Sized> Renderer for Box<R> {
    fn show(&mut self, frame: &Frame, overlay: Option<&str>) -> Result<()> {
        (**self).show(frame, overlay)
    }

    fn poll_quit(&mut self) -> bool {
        (**self).poll_quit()
    }

    fn close_all(&mut self) {
        (**self).close_all()
    }
}

/// Overlay text drawn on every displayed frame
pub fn frame_overlay(frame: &Frame) -> String {
    format!("Frame: {}", frame.frame_index())
}

/// Build the renderer selected in the configuration
pub fn from_config(config: &RenderConfig) -> Result<Box<dyn Renderer>> {
    match config.renderer {
        RendererKind::Log => Ok(Box::new(LogRenderer::new(&config.window_name, config.quit_after))),
        RendererKind::Snapshot => {
            let dir = config.snapshot_dir.as_deref().ok_or_else(|| {
                crate::StreamError::config(None, "render.snapshot_dir is required for the snapshot renderer")
            })?;
            let renderer = SnapshotRenderer::create(dir, config.numbered_snapshots)?.quit_after(config.quit_after);
            Ok(Box::new(renderer))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_frame;

    #[test]
    fn overlay_names_the_frame_index() {
        assert_eq!(frame_overlay(&sample_frame(2, 2, 42)), "Frame: 42");
    }

    #[test]
    fn from_config_builds_selected_renderer() {
        let mut config = RenderConfig { quit_after: Some(1), ..RenderConfig::default() };
        let mut renderer = from_config(&config).unwrap();
        renderer.show(&sample_frame(2, 2, 0), Some("Frame: 0")).unwrap();
        assert!(renderer.poll_quit());
        renderer.close_all();

        config.renderer = RendererKind::Snapshot;
        assert!(from_config(&config).is_err());

        let dir = tempfile::tempdir().unwrap();
        config.snapshot_dir = Some(dir.path().to_path_buf());
        assert!(from_config(&config).is_ok());
    }
}
