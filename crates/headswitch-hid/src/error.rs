//! HID error types.

use thiserror::Error;

/// HID error type.
#[derive(Debug, Error)]
pub enum HidError {
    #[error("Receiver not found")]
    DeviceNotFound,

    #[error("No receiver interface on usage page {0:#06x} with an output report")]
    NoCapableInterface(u16),

    #[error("HID API error: {0}")]
    Api(String),

    #[error("No reply within {0} ms")]
    Timeout(u64),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Malformed report descriptor: {0}")]
    Descriptor(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<hidapi::HidError> for HidError {
    fn from(e: hidapi::HidError) -> Self {
        Self::Api(e.to_string())
    }
}

/// Result type for HID operations.
pub type HidResult<T> = Result<T, HidError>;
