//! Recording sessions behind a serialized command actor.
//!
//! [`RecordingActor`] owns a worker thread that executes every
//! lifecycle command in arrival order, so callers on the render thread
//! can fire-and-forget frames while start, stop, crop updates and
//! context migration stay race-free.

mod actor;
mod stats;

pub use actor::{RecordingActor, RenderBackendFactory};
pub use stats::{FrameMeter, FrameStats};

pub use sr_common::{
    AudioEncoderConfig, CropRect, PtsNanos, RecordError, RecorderEvent, RecorderHandle,
    RecordingConfig, RecordingSummary, Resolution, SharedContextHandle, TextureId,
    TextureTransform,
};
