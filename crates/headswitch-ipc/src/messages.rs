//! Relay control messages.

use headswitch_core::routing_id;
use serde::{Deserialize, Serialize};

/// Commands the relay accepts.
///
/// Serialized as `{"command": "SetOutput", "data": {"device_id": "..."}}`;
/// unit commands carry no `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "data")]
pub enum ProxyCommand {
    /// Switch the speaker output device
    SetOutput { device_id: String },
    /// Report the relay's current configuration
    GetStatus,
    /// Shut the relay down
    Stop,
    /// Switch the physical microphone the relay captures from
    SetMicInput { device_id: String },
    /// Enable or disable the microphone path
    EnableMic { enabled: bool },
}

impl ProxyCommand {
    /// Command name as it appears on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetOutput { .. } => "SetOutput",
            Self::GetStatus => "GetStatus",
            Self::Stop => "Stop",
            Self::SetMicInput { .. } => "SetMicInput",
            Self::EnableMic { .. } => "EnableMic",
        }
    }

    /// The same command with device ids in the routing namespace.
    #[must_use]
    pub fn into_routing(self) -> Self {
        match self {
            Self::SetOutput { device_id } => Self::SetOutput { device_id: routing_id(&device_id).to_string() },
            Self::SetMicInput { device_id } => Self::SetMicInput { device_id: routing_id(&device_id).to_string() },
            other => other,
        }
    }
}

/// Relay reply to any command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mic_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mic_input_device: Option<String>,
}

/// Last known relay configuration, as cached by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyStatus {
    pub running: bool,
    pub output_device: Option<String>,
    pub mic_enabled: bool,
    pub mic_input_device: Option<String>,
}

impl ProxyStatus {
    /// Fold a successful command into the cached status.
    pub fn apply_command(&mut self, command: &ProxyCommand) {
        match command {
            ProxyCommand::SetOutput { device_id } => self.output_device = Some(device_id.clone()),
            ProxyCommand::SetMicInput { device_id } => self.mic_input_device = Some(device_id.clone()),
            ProxyCommand::EnableMic { enabled } => self.mic_enabled = *enabled,
            ProxyCommand::Stop => self.running = false,
            ProxyCommand::GetStatus => {}
        }
    }

    /// Fold the state fields a reply echoes into the cached status.
    pub fn apply_response(&mut self, response: &ProxyResponse) {
        if let Some(running) = response.running {
            self.running = running;
        }
        if let Some(device) = &response.output_device {
            self.output_device = Some(device.clone());
        }
        if let Some(enabled) = response.mic_enabled {
            self.mic_enabled = enabled;
        }
        if let Some(device) = &response.mic_input_device {
            self.mic_input_device = Some(device.clone());
        }
    }
}
