//! Hand-off queue between the sensor callback and the tick loop
//!
//! The simulator delivers frames from its own dispatch thread; the tick loop
//! runs elsewhere. [`FrameQueue`] is the only state shared between them.
//! There is deliberately no blocking pop: the tick loop waiting for a frame
//! would stop the simulation clock that produces the frame.

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

use crate::types::Frame;

/// Consumer side of the frame hand-off, owned by the tick loop
pub struct FrameQueue {
    rx: Receiver<Frame>,
    tx: Sender<Frame>,
    dropped: Arc<AtomicU64>,
}

/// Producer side of the frame hand-off, handed to the sensor callback
#[derive(Clone)]
pub struct FrameSink {
    tx: Sender<Frame>,
    dropped: Arc<AtomicU64>,
}

impl FrameQueue {
    /// Queue that grows without limit
    ///
    /// Fine for the stepped workload: the loop drains every tick, so the
    /// backlog stays at zero or one frame.
    pub fn unbounded() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { rx, tx, dropped: Arc::new(AtomicU64::new(0)) }
    }

    /// Queue holding at most `capacity` frames
    ///
    /// Pushing into a full queue drops the incoming frame.
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        Self { rx, tx, dropped: Arc::new(AtomicU64::new(0)) }
    }

    /// Build from an optional capacity; `None` is unbounded
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        match capacity {
            Some(capacity) => Self::bounded(capacity),
            None => Self::unbounded(),
        }
    }

    /// Producer handle for the frame callback
    pub fn sink(&self) -> FrameSink {
        FrameSink { tx: self.tx.clone(), dropped: Arc::clone(&self.dropped) }
    }

    /// Take the oldest frame if one is ready; never waits
    pub fn try_pop(&self) -> Option<Frame> {
        match self.rx.try_recv() {
            Ok(frame) => Some(frame),
            // The queue keeps its own sender, so Disconnected cannot happen.
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Frames currently waiting
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no frame is waiting
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Frames discarded because a bounded queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl FrameSink {
    /// Enqueue a frame; never blocks
    pub fn push(&self, frame: Frame) {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                trace!(frame_index = frame.frame_index(), dropped, "Frame queue full, dropping frame");
            }
            Err(TrySendError::Disconnected(frame)) => {
                trace!(frame_index = frame.frame_index(), "Frame queue closed, dropping frame");
            }
        }
    }
}
