use sr_common::RecordError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid muxer state: {0}")]
    InvalidState(String),

    #[error("invalid track: {0}")]
    Track(String),

    #[error("track {track_id} has no samples")]
    EmptyTrack { track_id: u32 },
}

pub type MuxResult<T> = Result<T, MuxError>;

impl From<MuxError> for RecordError {
    fn from(err: MuxError) -> Self {
        match err {
            MuxError::Io(e) => RecordError::Io(e),
            other => RecordError::MuxerFinalization(other.to_string()),
        }
    }
}
