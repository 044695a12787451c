//! Session events reported back to the recording's owner.

use std::path::PathBuf;
use std::time::Duration;

use crossbeam::channel::{Receiver, TryRecvError};

use crate::error::RecordError;
use crate::surface::InputSurface;

/// What a finished recording produced.
#[derive(Debug, Clone)]
pub struct RecordingSummary {
    /// Output files, in practice a single MP4.
    pub files: Vec<PathBuf>,
    /// Cover image, when one was captured. Currently always `None`.
    pub cover: Option<PathBuf>,
    /// Wall-clock length of the session.
    pub duration: Duration,
}

/// Lifecycle notifications emitted by a recording session.
#[derive(Debug)]
pub enum RecorderEvent {
    /// The encoder stack is prepared and the muxer is open.
    EncoderPrepared,
    /// The render surface is wired to the encoder; frames may flow.
    InputSurfaceReady(InputSurface),
    /// The start delay elapsed and frames are being captured.
    Started,
    /// The session finalized successfully.
    Finished(RecordingSummary),
    /// The session terminated with an error.
    Failed {
        error: RecordError,
        elapsed: Duration,
    },
}

impl RecorderEvent {
    /// True for the events that end a session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecorderEvent::Finished(_) | RecorderEvent::Failed { .. })
    }
}

/// Receiving side of a session's event stream.
#[derive(Debug)]
pub struct RecorderHandle {
    rx: Receiver<RecorderEvent>,
}

impl RecorderHandle {
    pub fn new(rx: Receiver<RecorderEvent>) -> Self {
        Self { rx }
    }

    /// Non-blocking poll for the next event.
    pub fn try_recv(&self) -> Option<RecorderEvent> {
        match self.rx.try_recv() {
            Ok(ev) => Some(ev),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Block until the next event, or until the session goes away.
    pub fn recv(&self) -> Option<RecorderEvent> {
        self.rx.recv().ok()
    }

    /// Drain everything currently queued.
    pub fn drain(&self) -> Vec<RecorderEvent> {
        let mut events = Vec::new();
        while let Some(ev) = self.try_recv() {
            events.push(ev);
        }
        events
    }

    /// Block until a terminal event arrives, collecting on the way.
    pub fn wait_terminal(&self) -> Vec<RecorderEvent> {
        let mut events = Vec::new();
        while let Some(ev) = self.recv() {
            let terminal = ev.is_terminal();
            events.push(ev);
            if terminal {
                break;
            }
        }
        events
    }
}
