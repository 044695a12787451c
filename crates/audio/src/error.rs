use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no input device available")]
    NoDevice,

    #[error("unsupported input config: {0}")]
    UnsupportedConfig(String),

    #[error("stream error: {0}")]
    Stream(String),
}

pub type AudioResult<T> = Result<T, AudioError>;

impl From<AudioError> for sr_common::RecordError {
    fn from(err: AudioError) -> Self {
        sr_common::RecordError::Audio(err.to_string())
    }
}
