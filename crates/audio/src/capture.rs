//! Microphone capture feeding the frame queue.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{info, warn};

use crate::error::{AudioError, AudioResult};
use crate::queue::AudioFrameQueue;

/// Live input stream pushing 16-bit little-endian PCM into an
/// [`AudioFrameQueue`].
///
/// The stream runs until the capture is dropped or [`stop`] is called;
/// the queue itself is closed by the session teardown, not here.
///
/// [`stop`]: MicrophoneCapture::stop
pub struct MicrophoneCapture {
    stream: cpal::Stream,
    sample_rate: u32,
    channels: u16,
}

impl MicrophoneCapture {
    /// Open the default input device and start capturing.
    pub fn start(queue: Arc<AudioFrameQueue>) -> AudioResult<Self> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(AudioError::NoDevice)?;
        let config = device
            .default_input_config()
            .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels();
        info!(sample_rate, channels, "opening input stream");

        let err_fn = |e: cpal::StreamError| warn!(error = %e, "input stream error");

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                let q = Arc::clone(&queue);
                device.build_input_stream(
                    &config.into(),
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mut bytes = Vec::with_capacity(data.len() * 2);
                        for &s in data {
                            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                            bytes.extend_from_slice(&v.to_le_bytes());
                        }
                        q.enqueue(&bytes, false);
                    },
                    err_fn,
                    None,
                )
            }
            cpal::SampleFormat::I16 => {
                let q = Arc::clone(&queue);
                device.build_input_stream(
                    &config.into(),
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let mut bytes = Vec::with_capacity(data.len() * 2);
                        for &s in data {
                            bytes.extend_from_slice(&s.to_le_bytes());
                        }
                        q.enqueue(&bytes, false);
                    },
                    err_fn,
                    None,
                )
            }
            other => {
                return Err(AudioError::UnsupportedConfig(format!(
                    "sample format {other:?}"
                )))
            }
        }
        .map_err(|e| AudioError::Stream(e.to_string()))?;

        stream.play().map_err(|e| AudioError::Stream(e.to_string()))?;

        Ok(Self {
            stream,
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Stop capturing. Dropping the capture has the same effect.
    pub fn stop(self) {
        drop(self.stream);
        info!("input stream stopped");
    }
}
