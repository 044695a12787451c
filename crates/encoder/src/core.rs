//! Encoder core: routes codec events into the muxer.
//!
//! Each device's events drain on a dedicated thread into one shared
//! muxing state. The muxer stays closed until every enabled track has
//! registered its format; output arriving before that rendezvous is
//! discarded, matching how a hardware codec emits leading buffers the
//! container cannot yet accept.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use sr_audio::AudioFrameQueue;
use sr_common::{
    InputSurface, RecordError, RecordResult, RecordingConfig, RecordingSummary, Resolution,
    SessionClock,
};
use sr_mux::Muxer;

use crate::device::{
    AudioDeviceFactory, AudioFormat, CodecEvent, VideoDeviceFactory, VideoEncoderDevice,
    AudioEncoderDevice, AUDIO_BIT_RATE,
};
use crate::setup::{cropped_target, select_video_device};
use crate::sync::TrackSync;

/// How long finalization waits for the end-of-stream marker to drain
/// through the codec callbacks.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

struct MuxShared {
    muxer: Option<Muxer>,
    sync: TrackSync,
    clock: SessionClock,
    audio_written: bool,
    failed: Option<RecordError>,
}

/// Owns the devices, the muxer and the drain threads for one session.
pub struct EncoderCore {
    video: Box<dyn VideoEncoderDevice>,
    audio: Option<Box<dyn AudioEncoderDevice>>,
    queue: Option<Arc<AudioFrameQueue>>,
    shared: Arc<Mutex<MuxShared>>,
    drains: Vec<JoinHandle<()>>,
    resolution: Resolution,
    started_at: Instant,
}

impl EncoderCore {
    /// Bring up devices, open the muxer and start draining events.
    ///
    /// Devices come up before the output file is touched, so a setup
    /// failure leaves no partial file behind.
    pub fn configure(
        config: &RecordingConfig,
        video_factory: &dyn VideoDeviceFactory,
        audio_factory: &dyn AudioDeviceFactory,
        queue: Option<Arc<AudioFrameQueue>>,
    ) -> RecordResult<Self> {
        config.validate()?;

        let target = cropped_target(config.width, config.height, config.crop);
        let (video, resolution) =
            select_video_device(video_factory, target, config.display_bounds, config.bit_rate)?;

        let audio = match (&config.audio, &queue) {
            (Some(a), Some(q)) => {
                let format = AudioFormat {
                    sample_rate: a.sample_rate,
                    channels: a.channels,
                    bit_rate: AUDIO_BIT_RATE,
                };
                Some(audio_factory.create(&format, Arc::clone(q))?)
            }
            (Some(_), None) => {
                return Err(RecordError::Configuration(
                    "audio enabled without a frame queue".into(),
                ))
            }
            _ => None,
        };

        let muxer = Muxer::new(&config.output_path)?;

        let shared = Arc::new(Mutex::new(MuxShared {
            muxer: Some(muxer),
            sync: TrackSync::new(audio.is_some()),
            clock: SessionClock::start(),
            audio_written: false,
            failed: None,
        }));

        let mut drains = Vec::new();
        if let Some(h) = spawn_drain("video-drain", Arc::clone(&shared), video.events(), true) {
            drains.push(h);
        }
        if let Some(a) = &audio {
            if let Some(h) = spawn_drain("audio-drain", Arc::clone(&shared), a.events(), false) {
                drains.push(h);
            }
        }

        info!(
            %resolution,
            audio = audio.is_some(),
            path = %config.output_path.display(),
            "encoder core configured"
        );
        Ok(Self {
            video,
            audio,
            queue,
            shared,
            drains,
            resolution,
            started_at: Instant::now(),
        })
    }

    /// Surface the renderer should publish frames into.
    pub fn input_surface(&self) -> InputSurface {
        self.video.input_surface()
    }

    /// The resolution the ladder actually selected.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Push captured PCM toward the audio encoder.
    pub fn submit_audio(&self, data: &[u8], end_of_stream: bool) {
        if let Some(queue) = &self.queue {
            queue.enqueue(data, end_of_stream);
        }
    }

    /// Flush, stop everything and finalize the container.
    pub fn finish(mut self) -> RecordResult<RecordingSummary> {
        self.video.signal_end_of_stream();
        if let Some(queue) = &self.queue {
            // Empty end-of-stream buffer tells the audio leg to wind
            // down through its normal path.
            queue.enqueue(&[], true);
        }

        let deadline = Instant::now() + DRAIN_TIMEOUT;
        loop {
            {
                let s = self.shared.lock();
                if !s.sync.started() || s.sync.stream_ended() || s.failed.is_some() {
                    break;
                }
            }
            if Instant::now() >= deadline {
                warn!("timed out waiting for end of stream");
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        if let Some(queue) = &self.queue {
            queue.close();
        }
        self.video.stop();
        if let Some(audio) = &mut self.audio {
            audio.stop();
        }
        for handle in self.drains.drain(..) {
            let _ = handle.join();
        }

        let mut s = self.shared.lock();
        if let Some(err) = s.failed.take() {
            return Err(err);
        }
        let st = &mut *s;
        let mut muxer = st
            .muxer
            .take()
            .ok_or_else(|| RecordError::Protocol("encoder core finished twice".into()))?;

        // An audio track that never produced data would make stop()
        // refuse the file; give it one silent 16-bit sample.
        if let Some(track) = st.sync.audio_track() {
            if st.sync.started() && !st.audio_written {
                let pts = st.clock.now_micros();
                muxer.write_sample(track, &[0u8, 0u8], pts, false)?;
                debug!("synthesized silent sample for empty audio track");
            }
        }

        let path = muxer.stop()?;
        let duration = self.started_at.elapsed();
        info!(path = %path.display(), ?duration, "recording finalized");
        Ok(RecordingSummary {
            files: vec![path],
            cover: None,
            duration,
        })
    }
}

fn spawn_drain(
    name: &str,
    shared: Arc<Mutex<MuxShared>>,
    rx: Receiver<CodecEvent>,
    is_video: bool,
) -> Option<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            for event in rx.iter() {
                if let Err(e) = handle_event(&shared, is_video, event) {
                    error!(error = %e, is_video, "codec event rejected");
                    let mut s = shared.lock();
                    if s.failed.is_none() {
                        s.failed = Some(e);
                    }
                }
            }
        })
        .map_err(|e| warn!(error = %e, name, "failed to spawn drain thread"))
        .ok()
}

fn handle_event(shared: &Mutex<MuxShared>, is_video: bool, event: CodecEvent) -> RecordResult<()> {
    let mut s = shared.lock();
    let st = &mut *s;
    match event {
        CodecEvent::FormatChanged(format) => {
            if st.sync.started() {
                return Err(RecordError::Protocol(
                    "format changed after muxer start".into(),
                ));
            }
            // Validate the registration before the muxer sees the
            // track, so a duplicate report cannot leave a spurious
            // track behind.
            if is_video {
                st.sync.ensure_can_register_video()?;
            } else {
                st.sync.ensure_can_register_audio()?;
            }
            let muxer = st
                .muxer
                .as_mut()
                .ok_or_else(|| RecordError::Protocol("format reported after finalization".into()))?;
            let track_id = muxer.add_track(format)?;
            if is_video {
                st.sync.register_video(track_id)?;
            } else {
                st.sync.register_audio(track_id)?;
            }
            debug!(track_id, is_video, "track format registered");

            if st.sync.ready_to_start() {
                muxer.start()?;
                st.sync.mark_started();
                info!("all tracks registered, muxer started");
            }
            Ok(())
        }
        CodecEvent::Output(chunk) => {
            if !st.sync.started() {
                debug!(is_video, bytes = chunk.data.len(), "output before muxer start discarded");
                return Ok(());
            }
            // Codec configuration buffers carry no media payload.
            let size = if chunk.codec_config { 0 } else { chunk.data.len() };
            if size > 0 {
                let track = if is_video {
                    st.sync.video_track()
                } else {
                    st.sync.audio_track()
                };
                if let (Some(track), Some(muxer)) = (track, st.muxer.as_mut()) {
                    // Samples are stamped as they leave the encoder.
                    let pts = st.clock.now_micros();
                    match muxer.write_sample(track, &chunk.data, pts, chunk.key_frame) {
                        Ok(()) => {
                            if !is_video {
                                st.audio_written = true;
                            }
                        }
                        Err(e) => warn!(error = %e, is_video, "sample write failed"),
                    }
                }
            }
            if chunk.end_of_stream {
                st.sync.mark_stream_ended();
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackAudioFactory, LoopbackVideoFactory};
    use sr_common::{AudioEncoderConfig, CropRect, PtsNanos, SurfaceFrame};
    use std::path::PathBuf;

    fn temp_mp4_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("sr_core_{}_{}.mp4", name, std::process::id()))
    }

    fn config(path: PathBuf, audio: bool) -> RecordingConfig {
        RecordingConfig {
            output_path: path,
            width: 1080,
            height: 1920,
            crop: CropRect::NONE,
            bit_rate: 4_000_000,
            shared_context: None,
            audio: audio.then(AudioEncoderConfig::default),
            overlay_enabled: false,
            start_delay: Duration::ZERO,
            display_bounds: Resolution::new(1080, 1920),
        }
    }

    fn settle() {
        std::thread::sleep(Duration::from_millis(150));
    }

    #[test]
    fn video_only_session_writes_playable_file() {
        let path = temp_mp4_path("video_only");
        let core = EncoderCore::configure(
            &config(path.clone(), false),
            &LoopbackVideoFactory::default(),
            &LoopbackAudioFactory,
            None,
        )
        .unwrap();
        assert_eq!(core.resolution(), Resolution::new(720, 1280));

        let surface = core.input_surface();
        for i in 0..30i64 {
            surface.submit(SurfaceFrame {
                pts: PtsNanos(i * 41_666_666),
            });
        }
        settle();
        let summary = core.finish().unwrap();

        assert_eq!(summary.files, vec![path.clone()]);
        assert!(summary.cover.is_none());
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[4..8], b"ftyp");
        assert!(bytes.windows(4).any(|w| w == b"vide"));
        assert!(!bytes.windows(4).any(|w| w == b"soun"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn audio_video_session_writes_both_tracks() {
        let path = temp_mp4_path("av");
        let queue = Arc::new(AudioFrameQueue::new());
        let core = EncoderCore::configure(
            &config(path.clone(), true),
            &LoopbackVideoFactory::default(),
            &LoopbackAudioFactory,
            Some(Arc::clone(&queue)),
        )
        .unwrap();
        settle();

        let surface = core.input_surface();
        for i in 0..10i64 {
            surface.submit(SurfaceFrame {
                pts: PtsNanos(i * 41_666_666),
            });
        }
        core.submit_audio(&[3u8; 1600], false);
        settle();
        let summary = core.finish().unwrap();

        let bytes = std::fs::read(&summary.files[0]).unwrap();
        assert!(bytes.windows(4).any(|w| w == b"vide"));
        assert!(bytes.windows(4).any(|w| w == b"soun"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn silent_audio_track_is_synthesized() {
        let path = temp_mp4_path("silent");
        let queue = Arc::new(AudioFrameQueue::new());
        let core = EncoderCore::configure(
            &config(path.clone(), true),
            &LoopbackVideoFactory::default(),
            &LoopbackAudioFactory,
            Some(queue),
        )
        .unwrap();
        settle();

        let surface = core.input_surface();
        for i in 0..5i64 {
            surface.submit(SurfaceFrame {
                pts: PtsNanos(i * 41_666_666),
            });
        }
        settle();
        // No audio data submitted at all; finish still succeeds.
        let summary = core.finish().unwrap();
        let bytes = std::fs::read(&summary.files[0]).unwrap();
        assert!(bytes.windows(4).any(|w| w == b"soun"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn immediate_finish_without_frames_fails_cleanly() {
        let path = temp_mp4_path("immediate");
        let core = EncoderCore::configure(
            &config(path.clone(), false),
            &LoopbackVideoFactory::default(),
            &LoopbackAudioFactory,
            None,
        )
        .unwrap();
        settle();
        // Muxer started (format arrived) but no media samples: the
        // empty track is refused rather than producing a broken file.
        let err = core.finish().unwrap_err();
        assert!(matches!(err, RecordError::MuxerFinalization(_)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn duplicate_format_before_rendezvous_adds_no_track() {
        use sr_mux::TrackFormat;

        let path = temp_mp4_path("dup_format");
        let shared = Mutex::new(MuxShared {
            muxer: Some(Muxer::new(&path).unwrap()),
            // Audio enabled keeps the muxer from starting on the
            // first video format alone.
            sync: TrackSync::new(true),
            clock: SessionClock::start(),
            audio_written: false,
            failed: None,
        });
        let format = || TrackFormat::Video {
            width: 640,
            height: 360,
            sps: vec![0x67, 0x42, 0x00, 0x1f],
            pps: vec![0x68, 0xce],
        };

        handle_event(&shared, true, CodecEvent::FormatChanged(format())).unwrap();
        let err = handle_event(&shared, true, CodecEvent::FormatChanged(format()))
            .err()
            .unwrap();
        assert!(matches!(err, RecordError::Protocol(_)));

        let s = shared.lock();
        assert_eq!(s.muxer.as_ref().unwrap().track_count(), 1);
        assert!(!s.sync.started());
        drop(s);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn audio_without_queue_is_rejected() {
        let path = temp_mp4_path("no_queue");
        let err = EncoderCore::configure(
            &config(path.clone(), true),
            &LoopbackVideoFactory::default(),
            &LoopbackAudioFactory,
            None,
        )
        .err()
        .unwrap();
        assert!(matches!(err, RecordError::Configuration(_)));
        assert!(!path.exists());
    }

    #[test]
    fn device_failure_leaves_no_output_file() {
        let path = temp_mp4_path("no_partial");
        let mut cfg = config(path.clone(), false);
        cfg.display_bounds = Resolution::new(100, 100);
        let err = EncoderCore::configure(
            &cfg,
            &LoopbackVideoFactory::default(),
            &LoopbackAudioFactory,
            None,
        )
        .err()
        .unwrap();
        assert!(matches!(err, RecordError::Configuration(_)));
        assert!(!path.exists());
    }
}
