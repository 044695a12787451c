//! Encoder device seams.

use std::sync::Arc;

use crossbeam::channel::Receiver;

use sr_audio::AudioFrameQueue;
use sr_common::{InputSurface, RecordResult, Resolution};
use sr_mux::TrackFormat;

/// Fixed capture frame rate.
pub const FRAME_RATE: u32 = 24;

/// Keyframe interval in seconds.
pub const IFRAME_INTERVAL: u32 = 1;

/// AAC bit rate for the audio track.
pub const AUDIO_BIT_RATE: u32 = 128_000;

/// Parameters a video device is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub resolution: Resolution,
    pub bit_rate: u32,
    pub frame_rate: u32,
    pub iframe_interval: u32,
}

/// Parameters an audio device is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_rate: u32,
}

/// One encoded buffer from a device.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub data: Vec<u8>,
    /// Codec configuration payload (SPS/PPS, ASC) rather than media.
    /// Treated as zero-length by the muxing path.
    pub codec_config: bool,
    pub key_frame: bool,
    pub end_of_stream: bool,
}

/// Event stream every encoder device produces.
///
/// Exactly one `FormatChanged` is expected per device, before any
/// media output; a second one is a protocol violation.
#[derive(Debug, Clone)]
pub enum CodecEvent {
    FormatChanged(TrackFormat),
    Output(OutputChunk),
}

/// A surface-fed video encoder.
pub trait VideoEncoderDevice: Send {
    /// Surface the renderer publishes frames into.
    fn input_surface(&self) -> InputSurface;

    /// The device's event stream. Multiple calls return receivers for
    /// the same underlying channel.
    fn events(&self) -> Receiver<CodecEvent>;

    /// Ask the device to flush pending frames and emit a final
    /// end-of-stream output.
    fn signal_end_of_stream(&mut self);

    /// Stop the device and join its worker. Idempotent.
    fn stop(&mut self);
}

/// A queue-fed audio encoder.
pub trait AudioEncoderDevice: Send {
    fn events(&self) -> Receiver<CodecEvent>;

    /// Stop the device and join its worker. Idempotent.
    fn stop(&mut self);
}

/// Creates video devices; called repeatedly down the resolution
/// ladder until a creation succeeds.
pub trait VideoDeviceFactory: Send + Sync {
    fn create(&self, format: &VideoFormat) -> RecordResult<Box<dyn VideoEncoderDevice>>;
}

/// Creates the audio device, consuming from the session's frame queue.
pub trait AudioDeviceFactory: Send + Sync {
    fn create(
        &self,
        format: &AudioFormat,
        queue: Arc<AudioFrameQueue>,
    ) -> RecordResult<Box<dyn AudioEncoderDevice>>;
}
