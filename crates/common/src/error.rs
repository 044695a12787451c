//! Session-level error type.

use thiserror::Error;

/// Errors a recording session can surface to its owner.
///
/// Per-sample failures inside the encoder callbacks are logged and
/// swallowed; only protocol violations and finalization failures
/// escalate into one of these.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("encoder protocol violation: {0}")]
    Protocol(String),

    #[error("muxer finalization failed: {0}")]
    MuxerFinalization(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("audio capture failed: {0}")]
    Audio(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RecordResult<T> = Result<T, RecordError>;
