//! The encoder input surface.
//!
//! The renderer publishes finished frames into an [`InputSurface`];
//! the video encoder device drains them from the paired receiver.
//! This is the hand-off point between the render thread and the
//! encoder, so the surface is cheap to clone and safe to send.

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::types::PtsNanos;

/// A rendered frame ready for encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceFrame {
    /// Presentation time stamped by the renderer before the swap.
    pub pts: PtsNanos,
}

/// Producer side of the encoder's frame queue.
#[derive(Debug, Clone)]
pub struct InputSurface {
    tx: Sender<SurfaceFrame>,
}

impl InputSurface {
    /// Create a surface and the receiver the encoder drains.
    pub fn channel() -> (Self, Receiver<SurfaceFrame>) {
        let (tx, rx) = channel::unbounded();
        (Self { tx }, rx)
    }

    /// Publish a swapped frame. Returns false if the encoder side has
    /// shut down, in which case the frame is dropped.
    pub fn submit(&self, frame: SurfaceFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Disconnected(_)) => false,
            Err(TrySendError::Full(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_flow_in_order() {
        let (surface, rx) = InputSurface::channel();
        assert!(surface.submit(SurfaceFrame { pts: PtsNanos(10) }));
        assert!(surface.submit(SurfaceFrame { pts: PtsNanos(20) }));
        assert_eq!(rx.recv().unwrap().pts, PtsNanos(10));
        assert_eq!(rx.recv().unwrap().pts, PtsNanos(20));
    }

    #[test]
    fn submit_after_receiver_drop_reports_failure() {
        let (surface, rx) = InputSurface::channel();
        drop(rx);
        assert!(!surface.submit(SurfaceFrame { pts: PtsNanos(0) }));
    }
}
