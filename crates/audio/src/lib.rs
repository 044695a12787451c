//! Audio ingestion for recording sessions.
//!
//! PCM arrives from the caller (or the microphone capture helper) in
//! arbitrarily sized buffers; [`AudioFrameQueue`] chops each one into
//! fixed sub-chunks sized for the encoder's input buffers and hands
//! them to the audio encoder device on demand.

pub mod capture;
pub mod error;
pub mod queue;

pub use capture::MicrophoneCapture;
pub use error::{AudioError, AudioResult};
pub use queue::{AudioChunk, AudioFrameQueue, SUB_CHUNKS};
