//! Muxer-start rendezvous.

use sr_common::{RecordError, RecordResult};

/// Tracks which codecs have reported their output format, and gates
/// the muxer start until all enabled tracks are registered.
///
/// A codec reporting its format twice is a protocol violation, as the
/// container cannot change a track's description after start.
#[derive(Debug)]
pub struct TrackSync {
    video_track: Option<u32>,
    audio_track: Option<u32>,
    audio_enabled: bool,
    started: bool,
    stream_ended: bool,
}

impl TrackSync {
    pub fn new(audio_enabled: bool) -> Self {
        Self {
            video_track: None,
            audio_track: None,
            audio_enabled,
            started: false,
            stream_ended: false,
        }
    }

    /// Check that a video registration would be accepted, without
    /// performing it. Lets callers validate before committing side
    /// effects elsewhere.
    pub fn ensure_can_register_video(&self) -> RecordResult<()> {
        if self.video_track.is_some() {
            return Err(RecordError::Protocol(
                "video format reported twice".into(),
            ));
        }
        Ok(())
    }

    /// Audio counterpart of [`ensure_can_register_video`].
    ///
    /// [`ensure_can_register_video`]: TrackSync::ensure_can_register_video
    pub fn ensure_can_register_audio(&self) -> RecordResult<()> {
        if !self.audio_enabled {
            return Err(RecordError::Protocol(
                "audio format reported on a video-only session".into(),
            ));
        }
        if self.audio_track.is_some() {
            return Err(RecordError::Protocol(
                "audio format reported twice".into(),
            ));
        }
        Ok(())
    }

    pub fn register_video(&mut self, track_id: u32) -> RecordResult<()> {
        self.ensure_can_register_video()?;
        self.video_track = Some(track_id);
        Ok(())
    }

    pub fn register_audio(&mut self, track_id: u32) -> RecordResult<()> {
        self.ensure_can_register_audio()?;
        self.audio_track = Some(track_id);
        Ok(())
    }

    /// All enabled tracks registered and not yet started.
    pub fn ready_to_start(&self) -> bool {
        self.video_track.is_some()
            && (!self.audio_enabled || self.audio_track.is_some())
            && !self.started
    }

    pub fn mark_started(&mut self) {
        self.started = true;
    }

    pub fn mark_stream_ended(&mut self) {
        self.stream_ended = true;
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn stream_ended(&self) -> bool {
        self.stream_ended
    }

    pub fn video_track(&self) -> Option<u32> {
        self.video_track
    }

    pub fn audio_track(&self) -> Option<u32> {
        self.audio_track
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_only_session_ready_after_video() {
        let mut sync = TrackSync::new(false);
        assert!(!sync.ready_to_start());
        sync.register_video(0).unwrap();
        assert!(sync.ready_to_start());
        sync.mark_started();
        assert!(!sync.ready_to_start());
    }

    #[test]
    fn audio_session_waits_for_both() {
        let mut sync = TrackSync::new(true);
        sync.register_video(0).unwrap();
        assert!(!sync.ready_to_start());
        sync.register_audio(1).unwrap();
        assert!(sync.ready_to_start());
    }

    #[test]
    fn registration_order_does_not_matter() {
        let mut sync = TrackSync::new(true);
        sync.register_audio(0).unwrap();
        assert!(!sync.ready_to_start());
        sync.register_video(1).unwrap();
        assert!(sync.ready_to_start());
    }

    #[test]
    fn double_video_registration_is_protocol_error() {
        let mut sync = TrackSync::new(false);
        sync.register_video(0).unwrap();
        assert!(matches!(
            sync.register_video(1),
            Err(RecordError::Protocol(_))
        ));
    }

    #[test]
    fn double_audio_registration_is_protocol_error() {
        let mut sync = TrackSync::new(true);
        sync.register_audio(0).unwrap();
        assert!(matches!(
            sync.register_audio(1),
            Err(RecordError::Protocol(_))
        ));
    }

    #[test]
    fn audio_on_video_only_session_is_protocol_error() {
        let mut sync = TrackSync::new(false);
        assert!(matches!(
            sync.register_audio(0),
            Err(RecordError::Protocol(_))
        ));
    }
}
