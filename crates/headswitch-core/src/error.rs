//! Error types for Headswitch core.

use thiserror::Error;

/// Core error type.
///
/// Components never hand these across their boundaries as failures of a
/// call; they are logged at the point of failure and the caller receives a
/// typed outcome instead. The variants name the failure classes a UI needs
/// to tell apart.
#[derive(Debug, Error)]
pub enum Error {
    #[error("No receiver enumerated")]
    DeviceAbsent,

    #[error("No usable reply from receiver: {0}")]
    CommunicationTimeout(String),

    #[error("No audio routing interface could be activated")]
    UnsupportedPlatform,

    #[error("Migrated {addressed} of {total} audio sessions")]
    PartialMigrationFailure { addressed: usize, total: usize },

    #[error("Device pair not configured: {0}")]
    ConfigurationMissing(String),

    #[error("Control channel unreachable: {0}")]
    ChannelUnreachable(String),

    #[error("State error: {0}")]
    StateError(String),
}

impl Error {
    /// Whether this condition persists until the environment changes.
    ///
    /// A missing receiver or an unsupported platform will not go away on the
    /// next poll, unlike a timeout or an unreachable relay.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::DeviceAbsent | Self::UnsupportedPlatform)
    }
}

/// Result type alias for Headswitch core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistent_classification() {
        assert!(Error::DeviceAbsent.is_persistent());
        assert!(Error::UnsupportedPlatform.is_persistent());
        assert!(!Error::CommunicationTimeout("read timed out".into()).is_persistent());
        assert!(!Error::ChannelUnreachable("pipe busy".into()).is_persistent());
        assert!(!Error::PartialMigrationFailure { addressed: 1, total: 3 }.is_persistent());
    }

    #[test]
    fn test_partial_migration_message() {
        let err = Error::PartialMigrationFailure { addressed: 2, total: 5 };
        assert_eq!(err.to_string(), "Migrated 2 of 5 audio sessions");
    }
}
