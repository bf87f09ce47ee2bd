//! Device enumeration and process lookup collaborators.

use tokio::sync::broadcast;

use crate::endpoint::{DataFlow, Endpoint, same_endpoint};

/// Notification that the set of endpoints or the defaults changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevicesChanged;

/// Lists audio endpoints and reports changes to them.
pub trait DeviceEnumerator: Send + Sync {
    /// All active endpoints for a flow.
    fn endpoints(&self, flow: DataFlow) -> Vec<Endpoint>;

    /// Subscribe to device-set change notifications.
    fn subscribe(&self) -> broadcast::Receiver<DevicesChanged>;

    /// The current default endpoint for a flow.
    fn default_endpoint(&self, flow: DataFlow) -> Option<Endpoint> {
        self.endpoints(flow).into_iter().find(|e| e.is_default)
    }

    /// Look up an endpoint of either flow by id, in either namespace.
    fn find(&self, id: &str) -> Option<Endpoint> {
        [DataFlow::Render, DataFlow::Capture]
            .into_iter()
            .flat_map(|flow| self.endpoints(flow))
            .find(|e| same_endpoint(&e.id, id))
    }
}

/// Maps process ids to names, for diagnostics only.
pub trait ProcessTable: Send + Sync {
    /// Name of the process, if it still exists.
    fn process_name(&self, pid: u32) -> Option<String>;
}
