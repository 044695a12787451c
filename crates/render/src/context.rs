//! Renderer lifecycle and context migration.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use sr_common::{
    CropRect, InputSurface, PtsNanos, SharedContextHandle, TextureId, TextureTransform,
};

use crate::backend::{RenderBackend, RenderResult};

/// Shared, live-updatable crop.
///
/// The owning thread updates it at any time; the render path reads the
/// current value on every frame. Values are applied as given; the
/// session config validates crops before a recording starts.
#[derive(Debug, Default)]
pub struct CropHolder {
    crop: Mutex<CropRect>,
}

impl CropHolder {
    pub fn new(initial: CropRect) -> Self {
        Self {
            crop: Mutex::new(initial),
        }
    }

    pub fn set(&self, crop: CropRect) {
        *self.crop.lock() = crop;
    }

    pub fn get(&self) -> CropRect {
        *self.crop.lock()
    }
}

/// Drives a backend to push cropped frames onto the encoder surface.
///
/// Holds everything needed to rebuild the backend from scratch, which
/// is how migration to a new shared context works: full release, then
/// configure against the new context. The crop holder survives the
/// rebuild, so a live crop carries over.
pub struct SurfaceRenderer {
    backend: Box<dyn RenderBackend>,
    crop: Arc<CropHolder>,
    surface: Option<InputSurface>,
    shared: Option<SharedContextHandle>,
    overlay_enabled: bool,
    configured: bool,
}

impl SurfaceRenderer {
    pub fn new(backend: Box<dyn RenderBackend>, crop: Arc<CropHolder>, overlay_enabled: bool) -> Self {
        Self {
            backend,
            crop,
            surface: None,
            shared: None,
            overlay_enabled,
            configured: false,
        }
    }

    /// Bind the backend to the encoder surface.
    pub fn configure(
        &mut self,
        shared: Option<SharedContextHandle>,
        surface: InputSurface,
    ) -> RenderResult<()> {
        self.backend.configure(shared, surface.clone())?;
        self.surface = Some(surface);
        self.shared = shared;
        self.configured = true;
        debug!(shared = ?shared, "renderer configured");
        Ok(())
    }

    /// Render one frame: draw with the current crop, stamp, swap.
    pub fn render(
        &mut self,
        texture: TextureId,
        transform: &TextureTransform,
        pts: PtsNanos,
    ) -> RenderResult<()> {
        let crop = self.crop.get();
        self.backend
            .draw_frame(texture, transform, crop, self.overlay_enabled)?;
        self.backend.set_presentation_time(pts)?;
        self.backend.swap_buffers()
    }

    /// Move to a different shared context without interrupting the
    /// recording: tear the backend down completely, then rebuild it
    /// against the same surface under the new context.
    pub fn migrate(&mut self, new_shared: SharedContextHandle) -> RenderResult<()> {
        let surface = self
            .surface
            .clone()
            .ok_or(crate::backend::RenderError::NotConfigured)?;
        info!(from = ?self.shared, to = ?new_shared, "migrating graphics context");
        self.backend.release();
        self.backend.configure(Some(new_shared), surface)?;
        self.shared = Some(new_shared);
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn crop_holder(&self) -> Arc<CropHolder> {
        Arc::clone(&self.crop)
    }

    /// Tear everything down. Safe to call more than once.
    pub fn release(&mut self) {
        if self.configured {
            debug!("renderer released");
        }
        self.backend.release();
        self.surface = None;
        self.shared = None;
        self.configured = false;
    }
}
