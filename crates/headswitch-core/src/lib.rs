//! Headswitch Core - link state model, endpoint identifiers, and switch logic.
//!
//! This crate contains the domain types shared by the probe, the endpoint
//! router, and the control-plane client, plus the [`SwitchOrchestrator`]
//! state machine that ties a headset's link state to the default audio
//! endpoint.

pub mod devices;
pub mod endpoint;
pub mod error;
pub mod link;
pub mod orchestrator;
pub mod routing;
pub mod settings;
pub mod state;

pub use devices::{DeviceEnumerator, DevicesChanged, ProcessTable};
pub use endpoint::{DataFlow, DeviceRole, Endpoint, persisted_endpoint_path, routing_id};
pub use error::{Error, Result};
pub use link::{LinkState, LinkStateChanged, LinkStateSource};
pub use orchestrator::SwitchOrchestrator;
pub use routing::{EndpointSwitcher, RoutingDecision, SwitchDirection};
pub use settings::{DevicePair, SettingsProvider, SharedSettings, SwitchSettings};
pub use state::{OrchestratorEvent, OrchestratorState, StatusSnapshot, SwitchRecord};
