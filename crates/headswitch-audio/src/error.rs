//! Audio error types.

use thiserror::Error;

/// Audio routing error type.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("No audio routing interface available on this platform")]
    Unsupported,

    #[error("{context} failed with status {code:#010x}")]
    Platform { context: &'static str, code: i32 },

    #[error("Per-process endpoints not supported by {0}")]
    NoPerProcess(&'static str),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;
