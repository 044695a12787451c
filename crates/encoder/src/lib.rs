//! Hardware-encoder orchestration.
//!
//! The pieces here mirror the shape of a callback-driven codec stack:
//! encoder devices emit [`CodecEvent`]s on their own threads, the
//! [`EncoderCore`] routes those events into the muxer, and
//! [`TrackSync`] holds the muxer closed until every enabled track has
//! reported its output format.

pub mod core;
pub mod device;
pub mod loopback;
pub mod setup;
pub mod sync;

pub use crate::core::EncoderCore;
pub use device::{
    AudioDeviceFactory, AudioEncoderDevice, AudioFormat, CodecEvent, OutputChunk,
    VideoDeviceFactory, VideoEncoderDevice, VideoFormat, AUDIO_BIT_RATE, FRAME_RATE,
    IFRAME_INTERVAL,
};
pub use loopback::{LoopbackAudioFactory, LoopbackVideoFactory};
pub use setup::{cropped_target, select_video_device, RESOLUTION_LADDER};
pub use sync::TrackSync;
