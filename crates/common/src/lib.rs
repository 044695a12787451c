//! Shared types for the screen-recording pipeline.
//!
//! Everything downstream — the muxer, the encoder core, the recording
//! actor — speaks in terms of these types: resolutions, timestamps,
//! crop rectangles, recording configuration and the event stream a
//! session reports back through.

pub mod config;
pub mod error;
pub mod events;
pub mod surface;
pub mod types;

pub use config::{AudioEncoderConfig, CropRect, RecordingConfig};
pub use error::{RecordError, RecordResult};
pub use events::{RecorderEvent, RecorderHandle, RecordingSummary};
pub use surface::{InputSurface, SurfaceFrame};
pub use types::{
    PtsMicros, PtsNanos, Resolution, SessionClock, SharedContextHandle, TextureId,
    TextureTransform,
};
