//! MP4 container writing for recording sessions.
//!
//! [`Muxer`] follows a strict lifecycle: add tracks, start, write
//! samples, stop. Sample data streams into a single mdat box as it
//! arrives; the moov box is assembled at stop time from the recorded
//! sample table, so nothing valid exists on disk until finalization
//! completes.

mod atoms;
mod error;
mod mp4;
mod muxer;

pub use error::{MuxError, MuxResult};
pub use muxer::{Muxer, TrackFormat};
