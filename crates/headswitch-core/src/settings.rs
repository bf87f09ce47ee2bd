//! Switching configuration as seen by the orchestrator.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::routing::SwitchDirection;

/// A primary (wireless) and secondary (wired) endpoint for one data flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePair {
    /// Endpoint used while the headset is online
    #[serde(default)]
    pub primary: Option<String>,
    /// Endpoint used while the headset is offline
    #[serde(default)]
    pub secondary: Option<String>,
}

impl DevicePair {
    /// Create a pair from two endpoint ids.
    #[must_use]
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self { primary: Some(primary.into()), secondary: Some(secondary.into()) }
    }

    /// Both ids, if both are set and non-empty.
    #[must_use]
    pub fn resolve(&self) -> Option<(&str, &str)> {
        let primary = self.primary.as_deref().filter(|s| !s.is_empty())?;
        let secondary = self.secondary.as_deref().filter(|s| !s.is_empty())?;
        Some((primary, secondary))
    }

    /// The configured member for a direction, if set and non-empty.
    #[must_use]
    pub fn target(&self, direction: SwitchDirection) -> Option<&str> {
        let id = match direction {
            SwitchDirection::ToPrimary => self.primary.as_deref(),
            SwitchDirection::ToSecondary => self.secondary.as_deref(),
        };
        id.filter(|s| !s.is_empty())
    }
}

/// Switching settings supplied by the settings collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchSettings {
    /// Whether automatic switching starts enabled
    pub enabled: bool,
    /// Speaker pair
    pub speaker: DevicePair,
    /// Microphone pair
    pub microphone: DevicePair,
}

impl Default for SwitchSettings {
    fn default() -> Self {
        Self { enabled: true, speaker: DevicePair::default(), microphone: DevicePair::default() }
    }
}

/// Read-only access to the current switching settings.
pub trait SettingsProvider: Send + Sync {
    /// Snapshot of the current settings.
    fn snapshot(&self) -> Arc<SwitchSettings>;
}

/// Settings held in memory and replaceable at runtime.
#[derive(Clone)]
pub struct SharedSettings {
    inner: Arc<ArcSwap<SwitchSettings>>,
}

impl SharedSettings {
    /// Create a settings store with an initial value.
    #[must_use]
    pub fn new(settings: SwitchSettings) -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(settings)) }
    }

    /// Replace the settings.
    pub fn store(&self, settings: SwitchSettings) {
        self.inner.store(Arc::new(settings));
    }
}

impl Default for SharedSettings {
    fn default() -> Self {
        Self::new(SwitchSettings::default())
    }
}

impl SettingsProvider for SharedSettings {
    fn snapshot(&self) -> Arc<SwitchSettings> {
        self.inner.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_requires_both_members() {
        assert_eq!(DevicePair::new("W", "D").resolve(), Some(("W", "D")));
        assert_eq!(DevicePair::default().resolve(), None);

        let half = DevicePair { primary: Some("W".into()), secondary: None };
        assert_eq!(half.resolve(), None);

        let blank = DevicePair { primary: Some("W".into()), secondary: Some(String::new()) };
        assert_eq!(blank.resolve(), None);
    }

    #[test]
    fn test_target_by_direction() {
        let pair = DevicePair::new("W", "D");
        assert_eq!(pair.target(SwitchDirection::ToPrimary), Some("W"));
        assert_eq!(pair.target(SwitchDirection::ToSecondary), Some("D"));
    }

    #[test]
    fn test_shared_settings_store() {
        let settings = SharedSettings::default();
        assert!(settings.snapshot().speaker.resolve().is_none());

        settings.store(SwitchSettings {
            enabled: false,
            speaker: DevicePair::new("W", "D"),
            microphone: DevicePair::default(),
        });

        let snapshot = settings.snapshot();
        assert!(!snapshot.enabled);
        assert_eq!(snapshot.speaker.resolve(), Some(("W", "D")));
    }
}
