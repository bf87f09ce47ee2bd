//! IPC error types.

use thiserror::Error;

/// IPC error type.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Relay unreachable: {0}")]
    Unreachable(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Relay closed the connection without a reply")]
    NoResponse,

    #[error("Relay rejected command: {0}")]
    Rejected(String),

    #[error("Reply exceeds {0} bytes")]
    MessageTooLarge(usize),
}

impl IpcError {
    /// Message suitable for showing to a user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Rejected(message) => message.clone(),
            Self::Unreachable(_) | Self::Timeout | Self::NoResponse => {
                headswitch_core::Error::ChannelUnreachable(self.to_string()).to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Result type for IPC operations.
pub type IpcResult<T> = Result<T, IpcError>;
