//! The recording actor and its worker loop.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use sr_audio::AudioFrameQueue;
use sr_common::{
    CropRect, PtsNanos, RecordError, RecorderEvent, RecorderHandle, RecordingConfig,
    SharedContextHandle, TextureId, TextureTransform,
};
use sr_encoder::{
    AudioDeviceFactory, EncoderCore, LoopbackAudioFactory, LoopbackVideoFactory,
    VideoDeviceFactory,
};
use sr_render::{CropHolder, HeadlessBackend, RenderBackend, SurfaceRenderer};

use crate::stats::FrameMeter;

/// Builds a fresh render backend for each session.
pub trait RenderBackendFactory: Send + Sync {
    fn create(&self) -> Box<dyn RenderBackend>;
}

struct HeadlessFactory;

impl RenderBackendFactory for HeadlessFactory {
    fn create(&self) -> Box<dyn RenderBackend> {
        Box::new(HeadlessBackend::new())
    }
}

enum Command {
    Start(Box<RecordingConfig>, Option<Arc<AudioFrameQueue>>),
    Frame {
        transform: TextureTransform,
        pts: PtsNanos,
    },
    SetTexture(TextureId),
    MigrateContext(SharedContextHandle),
    Stop,
    Terminate,
}

#[derive(Debug, Default)]
struct Flags {
    ready: bool,
    running: bool,
}

/// Serialized front door to the recording pipeline.
///
/// Every mutating call becomes a command executed in order on the
/// worker thread; only the crop update and audio ingestion take
/// shortcuts through shared state, since both are designed to be safe
/// mid-frame.
pub struct RecordingActor {
    cmd_tx: Sender<Command>,
    flags: Arc<(Mutex<Flags>, Condvar)>,
    crop: Arc<CropHolder>,
    queue: Mutex<Option<Arc<AudioFrameQueue>>>,
    handle: Option<RecorderHandle>,
    worker: Option<JoinHandle<()>>,
}

impl RecordingActor {
    /// Spawn the worker with the given device and backend factories.
    pub fn new(
        video_factory: Arc<dyn VideoDeviceFactory>,
        audio_factory: Arc<dyn AudioDeviceFactory>,
        backend_factory: Arc<dyn RenderBackendFactory>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = channel::unbounded();
        let (events_tx, events_rx) = channel::unbounded();
        let flags: Arc<(Mutex<Flags>, Condvar)> = Arc::new(Default::default());
        let crop = Arc::new(CropHolder::default());

        let deps = WorkerDeps {
            video_factory,
            audio_factory,
            backend_factory,
            events: events_tx,
            crop: Arc::clone(&crop),
            flags: Arc::clone(&flags),
        };
        let worker = std::thread::Builder::new()
            .name("recording-actor".into())
            .spawn(move || worker_loop(cmd_rx, deps))
            .ok();
        if worker.is_none() {
            warn!("failed to spawn recording actor worker");
        }

        Self {
            cmd_tx,
            flags,
            crop,
            queue: Mutex::new(None),
            handle: Some(RecorderHandle::new(events_rx)),
            worker,
        }
    }

    /// Actor wired to the software loopback stack.
    pub fn headless() -> Self {
        Self::new(
            Arc::new(LoopbackVideoFactory::default()),
            Arc::new(LoopbackAudioFactory),
            Arc::new(HeadlessFactory),
        )
    }

    /// Take the session event stream. Yields once.
    pub fn handle(&mut self) -> Option<RecorderHandle> {
        self.handle.take()
    }

    /// Begin a recording. Blocks until the worker is up, then returns;
    /// progress arrives through the event handle. A second call while
    /// a session runs is ignored.
    pub fn start_recording(&self, config: RecordingConfig) {
        {
            let (lock, cvar) = &*self.flags;
            let mut flags = lock.lock();
            while !flags.ready {
                cvar.wait(&mut flags);
            }
            if flags.running {
                warn!("start_recording ignored, session already running");
                return;
            }
            flags.running = true;
        }

        let queue = config
            .audio
            .is_some()
            .then(|| Arc::new(AudioFrameQueue::new()));
        *self.queue.lock() = queue.clone();
        let _ = self.cmd_tx.send(Command::Start(Box::new(config), queue));
    }

    /// A new frame of the source texture is ready.
    pub fn frame_available(&self, transform: TextureTransform, pts: PtsNanos) {
        let _ = self.cmd_tx.send(Command::Frame { transform, pts });
    }

    /// Set the texture rendered on subsequent frames.
    pub fn set_texture(&self, texture: TextureId) {
        let _ = self.cmd_tx.send(Command::SetTexture(texture));
    }

    /// Update the live crop. Applies from the next rendered frame.
    pub fn update_crop(&self, crop: CropRect) {
        self.crop.set(crop);
    }

    /// Rebuild the renderer against a different shared context.
    pub fn migrate_context(&self, context: SharedContextHandle) {
        let _ = self.cmd_tx.send(Command::MigrateContext(context));
    }

    /// Feed captured PCM to the audio leg. Dropped when no audio
    /// session is active.
    pub fn audio_frame_available(&self, data: &[u8], end_of_stream: bool) {
        if let Some(queue) = self.queue.lock().as_ref() {
            queue.enqueue(data, end_of_stream);
        }
    }

    pub fn is_recording(&self) -> bool {
        self.flags.0.lock().running
    }

    /// End the current session. No-op when nothing is recording.
    pub fn stop_recording(&self) {
        if !self.is_recording() {
            debug!("stop_recording ignored, no active session");
            return;
        }
        *self.queue.lock() = None;
        let _ = self.cmd_tx.send(Command::Stop);
    }
}

impl Drop for RecordingActor {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Terminate);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct WorkerDeps {
    video_factory: Arc<dyn VideoDeviceFactory>,
    audio_factory: Arc<dyn AudioDeviceFactory>,
    backend_factory: Arc<dyn RenderBackendFactory>,
    events: Sender<RecorderEvent>,
    crop: Arc<CropHolder>,
    flags: Arc<(Mutex<Flags>, Condvar)>,
}

impl WorkerDeps {
    fn set_running(&self, running: bool) {
        let (lock, cvar) = &*self.flags;
        lock.lock().running = running;
        cvar.notify_all();
    }
}

struct ActiveSession {
    core: EncoderCore,
    renderer: SurfaceRenderer,
    texture: Option<TextureId>,
    should_render: bool,
    render_at: Instant,
    started_emitted: bool,
    meter: FrameMeter,
    session_start: Instant,
}

fn worker_loop(cmd_rx: Receiver<Command>, deps: WorkerDeps) {
    {
        let (lock, cvar) = &*deps.flags;
        lock.lock().ready = true;
        cvar.notify_all();
    }
    debug!("recording actor ready");

    let mut session: Option<ActiveSession> = None;

    loop {
        // A pending start delay turns the blocking receive into a
        // timed one so the delay can fire with an empty queue.
        let pending_at = session
            .as_ref()
            .filter(|s| !s.started_emitted)
            .map(|s| s.render_at);

        let cmd = match pending_at {
            Some(at) => {
                let now = Instant::now();
                if at <= now {
                    fire_started(session.as_mut(), &deps);
                    continue;
                }
                match cmd_rx.recv_timeout(at - now) {
                    Ok(cmd) => cmd,
                    Err(RecvTimeoutError::Timeout) => {
                        fire_started(session.as_mut(), &deps);
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match cmd_rx.recv() {
                Ok(cmd) => cmd,
                Err(_) => break,
            },
        };

        match cmd {
            Command::Start(config, queue) => {
                if session.is_some() {
                    warn!("start command while a session is active, ignored");
                    continue;
                }
                match start_session(*config, queue, &deps) {
                    Ok(s) => session = Some(s),
                    Err(error) => {
                        warn!(error = %error, "session start failed");
                        deps.set_running(false);
                        let _ = deps.events.send(RecorderEvent::Failed {
                            error,
                            elapsed: Duration::ZERO,
                        });
                    }
                }
            }
            Command::Frame { transform, pts } => {
                if let Some(s) = session.as_mut() {
                    if s.should_render {
                        if let Some(texture) = s.texture {
                            match s.renderer.render(texture, &transform, pts) {
                                Ok(()) => s.meter.frame(),
                                Err(e) => warn!(error = %e, "frame render failed"),
                            }
                        }
                    }
                }
            }
            Command::SetTexture(texture) => {
                if let Some(s) = session.as_mut() {
                    s.texture = Some(texture);
                }
            }
            Command::MigrateContext(context) => {
                let failure = session
                    .as_mut()
                    .and_then(|s| s.renderer.migrate(context).err());
                if let Some(e) = failure {
                    warn!(error = %e, "context migration failed, aborting session");
                    if let Some(mut s) = session.take() {
                        s.renderer.release();
                        deps.set_running(false);
                        let _ = deps.events.send(RecorderEvent::Failed {
                            error: e.into(),
                            elapsed: s.session_start.elapsed(),
                        });
                    }
                }
            }
            Command::Stop => {
                match session.take() {
                    Some(s) => finish_session(s, &deps),
                    None => {
                        debug!("stop command with no session");
                        deps.set_running(false);
                    }
                }
            }
            Command::Terminate => break,
        }
    }

    // Terminate with a live session still finalizes it.
    if let Some(s) = session.take() {
        finish_session(s, &deps);
    }
    debug!("recording actor stopped");
}

fn fire_started(session: Option<&mut ActiveSession>, deps: &WorkerDeps) {
    if let Some(s) = session {
        if !s.started_emitted {
            s.started_emitted = true;
            s.should_render = true;
            s.meter.start();
            info!("capture started");
            let _ = deps.events.send(RecorderEvent::Started);
        }
    }
}

fn start_session(
    config: RecordingConfig,
    queue: Option<Arc<AudioFrameQueue>>,
    deps: &WorkerDeps,
) -> Result<ActiveSession, RecordError> {
    let core = EncoderCore::configure(
        &config,
        deps.video_factory.as_ref(),
        deps.audio_factory.as_ref(),
        queue,
    )?;
    let _ = deps.events.send(RecorderEvent::EncoderPrepared);

    deps.crop.set(config.crop);
    let mut renderer = SurfaceRenderer::new(
        deps.backend_factory.create(),
        Arc::clone(&deps.crop),
        config.overlay_enabled,
    );
    let surface = core.input_surface();
    renderer.configure(config.shared_context, surface.clone())?;
    let _ = deps.events.send(RecorderEvent::InputSurfaceReady(surface));

    info!(
        resolution = %core.resolution(),
        audio = config.audio_enabled(),
        delay = ?config.start_delay,
        "session prepared"
    );
    Ok(ActiveSession {
        core,
        renderer,
        texture: None,
        should_render: false,
        render_at: Instant::now() + config.start_delay,
        started_emitted: false,
        meter: FrameMeter::new(),
        session_start: Instant::now(),
    })
}

fn finish_session(mut s: ActiveSession, deps: &WorkerDeps) {
    s.should_render = false;
    let result = s.core.finish();
    s.renderer.release();
    s.meter.report();
    deps.set_running(false);

    match result {
        Ok(summary) => {
            let _ = deps.events.send(RecorderEvent::Finished(summary));
        }
        Err(error) => {
            let _ = deps.events.send(RecorderEvent::Failed {
                error,
                elapsed: s.session_start.elapsed(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sr_common::{AudioEncoderConfig, RecorderEvent, Resolution};
    use std::path::PathBuf;

    fn temp_mp4_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("sr_actor_{}_{}.mp4", name, std::process::id()))
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

    fn wait_for_started(handle: &RecorderHandle) {
        loop {
            match handle.recv() {
                Some(RecorderEvent::Started) => return,
                Some(ev) => assert!(!ev.is_terminal(), "unexpected terminal event: {ev:?}"),
                None => panic!("event stream closed before start"),
            }
        }
    }

    #[test]
    fn records_thirty_frames_to_single_video_file() {
        let path = temp_mp4_path("thirty");
        let mut actor = RecordingActor::headless();
        let handle = actor.handle().unwrap();

        actor.start_recording(config(path.clone(), false));
        actor.set_texture(TextureId(1));
        wait_for_started(&handle);
        assert!(actor.is_recording());

        for i in 0..30i64 {
            actor.frame_available(TextureTransform::IDENTITY, PtsNanos(i * 41_666_666));
        }
        actor.stop_recording();

        let events = handle.wait_terminal();
        let last = events.last().unwrap();
        match last {
            RecorderEvent::Finished(summary) => {
                assert_eq!(summary.files, vec![path.clone()]);
                assert!(summary.cover.is_none());
            }
            other => panic!("expected Finished, got {other:?}"),
        }
        assert!(!actor.is_recording());

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.windows(4).any(|w| w == b"vide"));
        assert!(!bytes.windows(4).any(|w| w == b"soun"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn immediate_stop_yields_exactly_one_terminal_event() {
        let path = temp_mp4_path("immediate");
        let mut actor = RecordingActor::headless();
        let handle = actor.handle().unwrap();

        actor.start_recording(config(path.clone(), false));
        actor.stop_recording();

        let events = handle.wait_terminal();
        let terminals = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminals, 1);
        assert!(!actor.is_recording());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn audio_session_produces_both_tracks() {
        let path = temp_mp4_path("audio");
        let mut actor = RecordingActor::headless();
        let handle = actor.handle().unwrap();

        actor.start_recording(config(path.clone(), true));
        actor.set_texture(TextureId(2));
        wait_for_started(&handle);

        for i in 0..10i64 {
            actor.frame_available(TextureTransform::IDENTITY, PtsNanos(i * 41_666_666));
            actor.audio_frame_available(&[7u8; 800], false);
        }
        actor.stop_recording();

        let events = handle.wait_terminal();
        assert!(matches!(events.last(), Some(RecorderEvent::Finished(_))));
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.windows(4).any(|w| w == b"vide"));
        assert!(bytes.windows(4).any(|w| w == b"soun"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn context_migration_mid_session_keeps_recording() {
        let path = temp_mp4_path("migrate");
        let mut actor = RecordingActor::headless();
        let handle = actor.handle().unwrap();

        actor.start_recording(config(path.clone(), false));
        actor.set_texture(TextureId(1));
        wait_for_started(&handle);

        for i in 0..5i64 {
            actor.frame_available(TextureTransform::IDENTITY, PtsNanos(i * 41_666_666));
        }
        actor.migrate_context(SharedContextHandle(9));
        for i in 5..10i64 {
            actor.frame_available(TextureTransform::IDENTITY, PtsNanos(i * 41_666_666));
        }
        actor.stop_recording();

        let events = handle.wait_terminal();
        assert!(matches!(events.last(), Some(RecorderEvent::Finished(_))));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn crop_update_mid_session_is_applied() {
        let path = temp_mp4_path("crop");
        let mut actor = RecordingActor::headless();
        let handle = actor.handle().unwrap();

        actor.start_recording(config(path.clone(), false));
        actor.set_texture(TextureId(1));
        wait_for_started(&handle);

        actor.frame_available(TextureTransform::IDENTITY, PtsNanos(0));
        actor.update_crop(CropRect {
            top: 0.1,
            bottom: 0.1,
            left: 0.0,
            right: 0.0,
        });
        actor.frame_available(TextureTransform::IDENTITY, PtsNanos(41_666_666));
        actor.stop_recording();

        let events = handle.wait_terminal();
        assert!(matches!(events.last(), Some(RecorderEvent::Finished(_))));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn second_start_while_running_is_ignored() {
        let path = temp_mp4_path("double_start");
        let other = temp_mp4_path("double_start_other");
        let mut actor = RecordingActor::headless();
        let handle = actor.handle().unwrap();

        actor.start_recording(config(path.clone(), false));
        actor.set_texture(TextureId(1));
        wait_for_started(&handle);
        actor.start_recording(config(other.clone(), false));
        assert!(actor.is_recording());
        assert!(!other.exists());

        actor.frame_available(TextureTransform::IDENTITY, PtsNanos(0));
        actor.stop_recording();
        let events = handle.wait_terminal();
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn worker_survives_stop_and_runs_a_second_session() {
        let first = temp_mp4_path("session_one");
        let second = temp_mp4_path("session_two");
        let mut actor = RecordingActor::headless();
        let handle = actor.handle().unwrap();

        actor.start_recording(config(first.clone(), false));
        actor.set_texture(TextureId(1));
        wait_for_started(&handle);
        actor.frame_available(TextureTransform::IDENTITY, PtsNanos(0));
        actor.stop_recording();
        let events = handle.wait_terminal();
        assert!(matches!(events.last(), Some(RecorderEvent::Finished(_))));
        assert!(!actor.is_recording());

        actor.start_recording(config(second.clone(), false));
        actor.set_texture(TextureId(1));
        wait_for_started(&handle);
        assert!(actor.is_recording());
        for i in 0..5i64 {
            actor.frame_available(TextureTransform::IDENTITY, PtsNanos(i * 41_666_666));
        }
        actor.stop_recording();
        let events = handle.wait_terminal();
        match events.last() {
            Some(RecorderEvent::Finished(summary)) => {
                assert_eq!(summary.files, vec![second.clone()]);
            }
            other => panic!("expected Finished, got {other:?}"),
        }
        std::fs::remove_file(&first).ok();
        std::fs::remove_file(&second).ok();
    }

    #[test]
    fn stop_without_start_is_a_no_op() {
        let actor = RecordingActor::headless();
        assert!(!actor.is_recording());
        actor.stop_recording();
        assert!(!actor.is_recording());
    }

    #[test]
    fn frames_before_start_delay_are_skipped() {
        let path = temp_mp4_path("delay");
        let mut actor = RecordingActor::headless();
        let handle = actor.handle().unwrap();

        let mut cfg = config(path.clone(), false);
        cfg.start_delay = Duration::from_millis(200);
        actor.start_recording(cfg);
        actor.set_texture(TextureId(1));

        // These arrive during the delay window and must not render.
        for i in 0..5i64 {
            actor.frame_available(TextureTransform::IDENTITY, PtsNanos(i));
        }
        wait_for_started(&handle);
        for i in 0..5i64 {
            actor.frame_available(TextureTransform::IDENTITY, PtsNanos(1_000_000 + i * 41_666_666));
        }
        actor.stop_recording();

        let events = handle.wait_terminal();
        assert!(matches!(events.last(), Some(RecorderEvent::Finished(_))));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn rejected_config_fails_without_partial_file() {
        let path = temp_mp4_path("bad_crop");
        let mut actor = RecordingActor::headless();
        let handle = actor.handle().unwrap();

        let mut cfg = config(path.clone(), false);
        cfg.crop = CropRect {
            top: 0.6,
            bottom: 0.6,
            left: 0.0,
            right: 0.0,
        };
        actor.start_recording(cfg);

        let events = handle.wait_terminal();
        assert!(matches!(
            events.last(),
            Some(RecorderEvent::Failed { error: RecordError::Configuration(_), .. })
        ));
        assert!(!actor.is_recording());
        assert!(!path.exists());
    }
}
