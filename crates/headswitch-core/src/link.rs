//! Headset link state.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Inferred link state of the wireless headset behind its receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// No receiver enumerated at all
    DongleAbsent,
    /// Receiver answered, headset is off or out of range
    Offline,
    /// Receiver answered, headset is linked
    Online,
    /// Receiver present but did not answer sensibly
    #[default]
    Unknown,
}

impl LinkState {
    /// Whether the headset is linked to its receiver.
    #[must_use]
    pub fn is_online(self) -> bool {
        self == Self::Online
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DongleAbsent => "dongle absent",
            Self::Offline => "offline",
            Self::Online => "online",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Notification raised when the resolved link state changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStateChanged {
    pub previous: LinkState,
    pub current: LinkState,
    pub at: SystemTime,
}

/// Something that keeps a headset's link state current and reports changes.
///
/// The headset monitor implements this; the orchestrator only depends on the
/// trait so it can be driven by a scripted source in tests.
pub trait LinkStateSource: Send + Sync {
    /// Most recently resolved link state.
    fn current(&self) -> LinkState;

    /// Subscribe to change notifications. Repeated identical states are
    /// never delivered.
    fn subscribe(&self) -> broadcast::Receiver<LinkStateChanged>;

    /// Start producing states if not already doing so.
    ///
    /// Returns `true` if this call started it.
    fn ensure_running(&self) -> bool;
}
