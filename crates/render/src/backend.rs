//! The backend seam between the renderer and a graphics API.

use thiserror::Error;

use sr_common::{
    CropRect, InputSurface, PtsNanos, SharedContextHandle, TextureId, TextureTransform,
};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("backend not configured")]
    NotConfigured,

    #[error("context lost: {0}")]
    ContextLost(String),

    #[error("draw failed: {0}")]
    Draw(String),
}

pub type RenderResult<T> = Result<T, RenderError>;

impl From<RenderError> for sr_common::RecordError {
    fn from(err: RenderError) -> Self {
        sr_common::RecordError::Render(err.to_string())
    }
}

/// Graphics-API seam the renderer drives.
///
/// A backend is bound to at most one encoder input surface at a time.
/// Migration is expressed through this trait as `release` followed by
/// a fresh `configure` against a different shared context.
pub trait RenderBackend: Send {
    /// Bind to the encoder surface, optionally joining a share group.
    fn configure(
        &mut self,
        shared: Option<SharedContextHandle>,
        surface: InputSurface,
    ) -> RenderResult<()>;

    /// Draw one frame of the source texture, cropped, with the
    /// watermark pass when `overlay` is set.
    fn draw_frame(
        &mut self,
        texture: TextureId,
        transform: &TextureTransform,
        crop: CropRect,
        overlay: bool,
    ) -> RenderResult<()>;

    /// Stamp the frame about to be swapped.
    fn set_presentation_time(&mut self, pts: PtsNanos) -> RenderResult<()>;

    /// Publish the drawn frame to the encoder surface.
    fn swap_buffers(&mut self) -> RenderResult<()>;

    /// Tear down all API resources. Must be idempotent.
    fn release(&mut self);
}
