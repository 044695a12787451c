//! Software loopback encoder devices.
//!
//! These stand in for a hardware codec stack: they run the same
//! threading and event protocol (format first, then outputs, then an
//! end-of-stream marker) but synthesize the encoded payload instead of
//! compressing anything. Used off-device and throughout the tests.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, warn};

use sr_audio::AudioFrameQueue;
use sr_common::{InputSurface, RecordError, RecordResult, SurfaceFrame};
use sr_mux::TrackFormat;

use crate::device::{
    AudioDeviceFactory, AudioEncoderDevice, CodecEvent, OutputChunk, VideoDeviceFactory,
    VideoEncoderDevice, AudioFormat, VideoFormat,
};

// Canned parameter sets reported by the loopback video codec.
const LOOPBACK_SPS: [u8; 8] = [0x67, 0x42, 0x00, 0x1f, 0xe9, 0x01, 0x40, 0x7b];
const LOOPBACK_PPS: [u8; 4] = [0x68, 0xce, 0x06, 0xe2];

const KEY_PAYLOAD_LEN: usize = 1024;
const DELTA_PAYLOAD_LEN: usize = 256;

enum VideoCtrl {
    EndOfStream,
    Stop,
}

/// Factory for [`LoopbackVideoDevice`]s.
///
/// `max_pixels` simulates a codec that refuses large sessions, which
/// exercises the resolution-ladder fallback.
#[derive(Debug, Clone, Default)]
pub struct LoopbackVideoFactory {
    pub max_pixels: Option<u64>,
}

impl VideoDeviceFactory for LoopbackVideoFactory {
    fn create(&self, format: &VideoFormat) -> RecordResult<Box<dyn VideoEncoderDevice>> {
        if let Some(max) = self.max_pixels {
            if format.resolution.pixel_count() > max {
                return Err(RecordError::Encode(format!(
                    "codec rejected {}",
                    format.resolution
                )));
            }
        }
        Ok(Box::new(LoopbackVideoDevice::new(format)))
    }
}

struct LoopbackVideoDevice {
    surface: InputSurface,
    events_rx: Receiver<CodecEvent>,
    ctrl_tx: Sender<VideoCtrl>,
    worker: Option<JoinHandle<()>>,
}

impl LoopbackVideoDevice {
    fn new(format: &VideoFormat) -> Self {
        let (surface, frame_rx) = InputSurface::channel();
        let (events_tx, events_rx) = channel::unbounded();
        let (ctrl_tx, ctrl_rx) = channel::unbounded();

        let format = *format;
        let worker = std::thread::Builder::new()
            .name("video-codec".into())
            .spawn(move || video_worker(format, frame_rx, ctrl_rx, events_tx))
            .ok();
        if worker.is_none() {
            warn!("failed to spawn video codec worker");
        }

        Self {
            surface,
            events_rx,
            ctrl_tx,
            worker,
        }
    }
}

fn synth_frame(index: u64, key_frame: bool) -> OutputChunk {
    let len = if key_frame {
        KEY_PAYLOAD_LEN
    } else {
        DELTA_PAYLOAD_LEN
    };
    let mut data = vec![0u8; len];
    data[..8].copy_from_slice(&index.to_be_bytes());
    OutputChunk {
        data,
        codec_config: false,
        key_frame,
        end_of_stream: false,
    }
}

fn video_worker(
    format: VideoFormat,
    frame_rx: Receiver<SurfaceFrame>,
    ctrl_rx: Receiver<VideoCtrl>,
    events_tx: Sender<CodecEvent>,
) {
    // Output format is known up front for the loopback codec.
    let track_format = TrackFormat::Video {
        width: format.resolution.width,
        height: format.resolution.height,
        sps: LOOPBACK_SPS.to_vec(),
        pps: LOOPBACK_PPS.to_vec(),
    };
    if events_tx.send(CodecEvent::FormatChanged(track_format)).is_err() {
        return;
    }

    let mut frame_index = 0u64;
    let emit = |index: &mut u64| {
        let key = *index % format.frame_rate as u64 == 0;
        let chunk = synth_frame(*index, key);
        *index += 1;
        events_tx.send(CodecEvent::Output(chunk)).is_ok()
    };

    loop {
        crossbeam::select! {
            recv(frame_rx) -> frame => match frame {
                Ok(_) => {
                    if !emit(&mut frame_index) {
                        return;
                    }
                }
                Err(_) => break,
            },
            recv(ctrl_rx) -> ctrl => match ctrl {
                Ok(VideoCtrl::EndOfStream) => {
                    // Flush whatever the renderer already swapped.
                    while frame_rx.try_recv().is_ok() {
                        if !emit(&mut frame_index) {
                            return;
                        }
                    }
                    let _ = events_tx.send(CodecEvent::Output(OutputChunk {
                        data: Vec::new(),
                        codec_config: false,
                        key_frame: false,
                        end_of_stream: true,
                    }));
                    break;
                }
                Ok(VideoCtrl::Stop) | Err(_) => break,
            },
        }
    }
    debug!(frames = frame_index, "video codec worker done");
}

impl VideoEncoderDevice for LoopbackVideoDevice {
    fn input_surface(&self) -> InputSurface {
        self.surface.clone()
    }

    fn events(&self) -> Receiver<CodecEvent> {
        self.events_rx.clone()
    }

    fn signal_end_of_stream(&mut self) {
        let _ = self.ctrl_tx.send(VideoCtrl::EndOfStream);
    }

    fn stop(&mut self) {
        let _ = self.ctrl_tx.send(VideoCtrl::Stop);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for LoopbackVideoDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

/// Factory for [`LoopbackAudioDevice`]s.
#[derive(Debug, Clone, Default)]
pub struct LoopbackAudioFactory;

impl AudioDeviceFactory for LoopbackAudioFactory {
    fn create(
        &self,
        format: &AudioFormat,
        queue: Arc<AudioFrameQueue>,
    ) -> RecordResult<Box<dyn AudioEncoderDevice>> {
        Ok(Box::new(LoopbackAudioDevice::new(format, queue)))
    }
}

struct LoopbackAudioDevice {
    events_rx: Receiver<CodecEvent>,
    queue: Arc<AudioFrameQueue>,
    worker: Option<JoinHandle<()>>,
}

impl LoopbackAudioDevice {
    fn new(format: &AudioFormat, queue: Arc<AudioFrameQueue>) -> Self {
        let (events_tx, events_rx) = channel::unbounded();
        let format = *format;
        let worker_queue = Arc::clone(&queue);
        let worker = std::thread::Builder::new()
            .name("audio-codec".into())
            .spawn(move || audio_worker(format, worker_queue, events_tx))
            .ok();
        if worker.is_none() {
            warn!("failed to spawn audio codec worker");
        }
        Self {
            events_rx,
            queue,
            worker,
        }
    }
}

fn audio_worker(format: AudioFormat, queue: Arc<AudioFrameQueue>, events_tx: Sender<CodecEvent>) {
    let track_format = TrackFormat::Audio {
        sample_rate: format.sample_rate,
        channels: format.channels,
        asc: audio_specific_config(format.sample_rate, format.channels),
    };
    if events_tx.send(CodecEvent::FormatChanged(track_format)).is_err() {
        return;
    }

    // Blocks on the queue until a chunk arrives or the queue closes.
    while let Some(chunk) = queue.dequeue() {
        let eos = chunk.end_of_stream;
        let sent = events_tx
            .send(CodecEvent::Output(OutputChunk {
                data: chunk.data,
                codec_config: false,
                key_frame: false,
                end_of_stream: eos,
            }))
            .is_ok();
        if !sent || eos {
            break;
        }
    }
    debug!("audio codec worker done");
}

impl AudioEncoderDevice for LoopbackAudioDevice {
    fn events(&self) -> Receiver<CodecEvent> {
        self.events_rx.clone()
    }

    fn stop(&mut self) {
        // Unblocks a worker waiting on an open queue.
        self.queue.close();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for LoopbackAudioDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Two-byte AAC-LC AudioSpecificConfig.
fn audio_specific_config(sample_rate: u32, channels: u16) -> Vec<u8> {
    const RATES: [u32; 13] = [
        96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025,
        8_000, 7_350,
    ];
    let freq_index = RATES
        .iter()
        .position(|&r| r == sample_rate)
        .unwrap_or(4) as u8; // default 44.1 kHz
    let object_type = 2u8; // AAC-LC
    let ch = channels as u8;
    vec![
        (object_type << 3) | (freq_index >> 1),
        ((freq_index & 1) << 7) | (ch << 3),
    ]
}
