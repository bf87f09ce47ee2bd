//! Switch directions, routing decisions, and the router seam.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::endpoint::DataFlow;
use crate::link::LinkState;

/// Which member of the configured pairs a switch moves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchDirection {
    /// Towards the wireless headset
    ToPrimary,
    /// Towards the wired fallback
    ToSecondary,
}

impl SwitchDirection {
    /// Direction implied by a link state, if any.
    #[must_use]
    pub fn for_link(link: LinkState) -> Option<Self> {
        match link {
            LinkState::Online => Some(Self::ToPrimary),
            LinkState::Offline => Some(Self::ToSecondary),
            LinkState::DongleAbsent | LinkState::Unknown => None,
        }
    }
}

impl fmt::Display for SwitchDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ToPrimary => "to primary",
            Self::ToSecondary => "to secondary",
        })
    }
}

/// Targets chosen for one switch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub direction: SwitchDirection,
    /// Speaker endpoint to make default, if the speaker flow needs to move
    pub speaker_target_id: Option<String>,
    /// Microphone endpoint to make default, if the capture flow needs to move
    pub mic_target_id: Option<String>,
}

impl RoutingDecision {
    /// Whether anything needs to change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.speaker_target_id.is_none() && self.mic_target_id.is_none()
    }
}

/// Changes the OS default endpoint and migrates running sessions.
///
/// Implementations never fail loudly: platform errors are logged and turned
/// into `false` or a zero count.
pub trait EndpointSwitcher: Send + Sync {
    /// Whether a routing interface was activated on this system.
    fn is_supported(&self) -> bool;

    /// Make `id` the default endpoint for `flow` across all roles.
    ///
    /// Returns `true` only if every role was assigned.
    fn set_default_endpoint(&self, id: &str, flow: DataFlow) -> bool;

    /// Point processes with active sessions on `flow` at `target_id`.
    ///
    /// Returns the number of processes successfully addressed.
    fn migrate_active_sessions(&self, target_id: &str, flow: DataFlow) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_for_link() {
        assert_eq!(SwitchDirection::for_link(LinkState::Online), Some(SwitchDirection::ToPrimary));
        assert_eq!(
            SwitchDirection::for_link(LinkState::Offline),
            Some(SwitchDirection::ToSecondary)
        );
        assert_eq!(SwitchDirection::for_link(LinkState::Unknown), None);
        assert_eq!(SwitchDirection::for_link(LinkState::DongleAbsent), None);
    }
}
