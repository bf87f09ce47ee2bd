//! Orchestrator state and the notifications it raises.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::link::LinkState;
use crate::routing::SwitchDirection;

/// Current state of the switch orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    /// Not subscribed to the monitor
    #[default]
    Stopped,
    /// Headset online, primary endpoints preferred
    PrimaryConnected,
    /// Headset offline, secondary endpoints preferred
    SecondaryActive,
    /// No receiver present
    DongleAbsent,
    /// Receiver present but link state could not be read
    Unknown,
}

impl OrchestratorState {
    /// State that follows from a raw link state.
    #[must_use]
    pub fn for_link(link: LinkState) -> Self {
        match link {
            LinkState::Online => Self::PrimaryConnected,
            LinkState::Offline => Self::SecondaryActive,
            LinkState::DongleAbsent => Self::DongleAbsent,
            LinkState::Unknown => Self::Unknown,
        }
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::PrimaryConnected => "primary connected",
            Self::SecondaryActive => "secondary active",
            Self::DongleAbsent => "dongle absent",
            Self::Unknown => "unknown",
        })
    }
}

/// Outcome of one switch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchRecord {
    pub direction: SwitchDirection,
    /// Display name of the speaker target, or of the mic target when only
    /// the microphone moved
    pub target_name: String,
    /// Routing id of the speaker target, when the speaker moved
    pub speaker_target_id: Option<String>,
    pub success: bool,
    /// Whether gating was bypassed by a manual apply
    pub forced: bool,
    pub at: SystemTime,
    /// Human-readable summary for display
    pub description: String,
}

/// Notifications raised by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "data")]
pub enum OrchestratorEvent {
    StateChanged { previous: OrchestratorState, current: OrchestratorState, at: SystemTime },
    SwitchPerformed(SwitchRecord),
    EnabledChanged { enabled: bool, at: SystemTime },
    /// The speaker default moved onto or off the configured pair
    ConfiguredDeviceMismatch {
        using_configured_device: bool,
        current_default: Option<String>,
        at: SystemTime,
    },
}

/// Complete snapshot of the orchestrator's current status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: OrchestratorState,
    pub link: LinkState,
    pub enabled: bool,
    pub using_configured_device: bool,
    pub router_supported: bool,
    pub last_switch: Option<SwitchRecord>,
}
