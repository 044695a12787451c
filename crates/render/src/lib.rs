//! Capture-surface rendering.
//!
//! [`SurfaceRenderer`] drives a [`RenderBackend`] to blit the caller's
//! texture onto the encoder input surface, applies the live crop, and
//! survives graphics-context migration by tearing the backend down and
//! rebuilding it against the new shared context.

mod backend;
mod context;
mod headless;

pub use backend::{RenderBackend, RenderError, RenderResult};
pub use context::{CropHolder, SurfaceRenderer};
pub use headless::HeadlessBackend;
