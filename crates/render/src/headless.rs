//! CPU-only backend used off-device and in tests.

use tracing::{debug, trace};

use sr_common::{
    CropRect, InputSurface, PtsNanos, SharedContextHandle, SurfaceFrame, TextureId,
    TextureTransform,
};

use crate::backend::{RenderBackend, RenderError, RenderResult};

/// Backend that performs no GPU work and forwards each swapped frame
/// straight into the encoder input surface.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    surface: Option<InputSurface>,
    shared: Option<SharedContextHandle>,
    pending_pts: Option<PtsNanos>,
    drawn: bool,
    frames_submitted: u64,
    configure_count: u32,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// How many times this backend has been configured. Counts up
    /// across migrations.
    pub fn configure_count(&self) -> u32 {
        self.configure_count
    }

    pub fn shared_context(&self) -> Option<SharedContextHandle> {
        self.shared
    }
}

impl RenderBackend for HeadlessBackend {
    fn configure(
        &mut self,
        shared: Option<SharedContextHandle>,
        surface: InputSurface,
    ) -> RenderResult<()> {
        self.surface = Some(surface);
        self.shared = shared;
        self.configure_count += 1;
        debug!(shared = ?shared, count = self.configure_count, "headless backend configured");
        Ok(())
    }

    fn draw_frame(
        &mut self,
        texture: TextureId,
        _transform: &TextureTransform,
        crop: CropRect,
        overlay: bool,
    ) -> RenderResult<()> {
        if self.surface.is_none() {
            return Err(RenderError::NotConfigured);
        }
        trace!(texture = texture.0, ?crop, overlay, "draw");
        self.drawn = true;
        Ok(())
    }

    fn set_presentation_time(&mut self, pts: PtsNanos) -> RenderResult<()> {
        if self.surface.is_none() {
            return Err(RenderError::NotConfigured);
        }
        self.pending_pts = Some(pts);
        Ok(())
    }

    fn swap_buffers(&mut self) -> RenderResult<()> {
        let surface = self.surface.as_ref().ok_or(RenderError::NotConfigured)?;
        if !self.drawn {
            return Err(RenderError::Draw("swap without draw".into()));
        }
        let pts = self.pending_pts.take().unwrap_or(PtsNanos::ZERO);
        surface.submit(SurfaceFrame { pts });
        self.drawn = false;
        self.frames_submitted += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.surface = None;
        self.shared = None;
        self.pending_pts = None;
        self.drawn = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_before_configure_fails() {
        let mut backend = HeadlessBackend::new();
        let err = backend
            .draw_frame(
                TextureId(1),
                &TextureTransform::IDENTITY,
                CropRect::NONE,
                false,
            )
            .unwrap_err();
        assert!(matches!(err, RenderError::NotConfigured));
    }

    #[test]
    fn swap_forwards_frame_with_pts() {
        let (surface, rx) = InputSurface::channel();
        let mut backend = HeadlessBackend::new();
        backend.configure(None, surface).unwrap();
        backend
            .draw_frame(
                TextureId(3),
                &TextureTransform::IDENTITY,
                CropRect::NONE,
                true,
            )
            .unwrap();
        backend.set_presentation_time(PtsNanos(42_000)).unwrap();
        backend.swap_buffers().unwrap();

        assert_eq!(rx.recv().unwrap().pts, PtsNanos(42_000));
        assert_eq!(backend.frames_submitted(), 1);
    }

    #[test]
    fn swap_without_draw_fails() {
        let (surface, _rx) = InputSurface::channel();
        let mut backend = HeadlessBackend::new();
        backend.configure(None, surface).unwrap();
        assert!(matches!(
            backend.swap_buffers(),
            Err(RenderError::Draw(_))
        ));
    }

    #[test]
    fn release_is_idempotent_and_resets() {
        let (surface, _rx) = InputSurface::channel();
        let mut backend = HeadlessBackend::new();
        backend
            .configure(Some(SharedContextHandle(7)), surface)
            .unwrap();
        backend.release();
        backend.release();
        assert!(backend.shared_context().is_none());
        assert!(matches!(
            backend.set_presentation_time(PtsNanos::ZERO),
            Err(RenderError::NotConfigured)
        ));
    }
}
