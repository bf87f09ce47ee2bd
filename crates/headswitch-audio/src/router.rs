//! Endpoint router - default endpoint switching and session migration.

use std::collections::BTreeSet;
use std::sync::Arc;

use headswitch_core::{
    DataFlow, DeviceRole, EndpointSwitcher, Error as CoreError, ProcessTable, persisted_endpoint_path,
    routing_id,
};
use tracing::{debug, info, warn};

use crate::process::SystemProcessTable;
use crate::provider::{self, Candidate, PolicyBackend, SessionSource};

/// Switches default endpoints through the first routing facility that
/// activated on this system.
pub struct EndpointRouter {
    backend: Option<Box<dyn PolicyBackend>>,
    sessions: Arc<dyn SessionSource>,
    processes: Arc<dyn ProcessTable>,
}

impl EndpointRouter {
    /// Build a router from candidates, keeping the first that activates.
    pub fn new(
        candidates: &[Candidate],
        sessions: Arc<dyn SessionSource>,
        processes: Arc<dyn ProcessTable>,
    ) -> Self {
        let backend = provider::activate_first(candidates);
        if backend.is_none() {
            warn!("{}", CoreError::UnsupportedPlatform);
        }
        Self { backend, sessions, processes }
    }

    /// Build a router for the running platform.
    #[must_use]
    pub fn platform() -> Self {
        Self::new(
            &provider::platform_candidates(),
            provider::platform_sessions(),
            Arc::new(SystemProcessTable),
        )
    }

    /// Name of the active routing facility.
    #[must_use]
    pub fn provider_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|b| b.name())
    }

    fn migrate_process(&self, backend: &dyn PolicyBackend, pid: u32, flow: DataFlow, path: &str) -> bool {
        let mut ok = true;
        for role in DeviceRole::ALL {
            if let Err(e) = backend.set_process_default(pid, flow, role, path) {
                debug!(pid, %role, error = %e, "Failed to persist process endpoint");
                ok = false;
            }
        }
        ok
    }
}

impl EndpointSwitcher for EndpointRouter {
    fn is_supported(&self) -> bool {
        self.backend.is_some()
    }

    fn set_default_endpoint(&self, id: &str, flow: DataFlow) -> bool {
        let Some(backend) = &self.backend else {
            debug!(%flow, "{}", CoreError::UnsupportedPlatform);
            return false;
        };

        let target = routing_id(id);
        let mut all = true;
        for role in DeviceRole::ALL {
            match backend.set_default(target, role) {
                Ok(()) => debug!(%flow, %role, id = %target, "Default endpoint set"),
                Err(e) => {
                    warn!(%flow, %role, id = %target, error = %e, "Failed to set default endpoint");
                    all = false;
                }
            }
        }

        if all {
            info!(%flow, id = %target, provider = backend.name(), "Default endpoint switched");
        }
        all
    }

    fn migrate_active_sessions(&self, target_id: &str, flow: DataFlow) -> usize {
        let Some(backend) = &self.backend else {
            return 0;
        };
        if !backend.supports_per_process() {
            debug!(provider = backend.name(), "Provider cannot migrate sessions");
            return 0;
        }

        let pids: BTreeSet<u32> = match self.sessions.active_session_pids(flow) {
            Ok(pids) => pids.into_iter().filter(|&pid| pid != 0).collect(),
            Err(e) => {
                warn!(%flow, error = %e, "Failed to enumerate audio sessions");
                return 0;
            }
        };

        if pids.is_empty() {
            debug!(%flow, "No active sessions to migrate");
            return 0;
        }

        let path = persisted_endpoint_path(target_id, flow);
        let mut addressed = 0;
        for &pid in &pids {
            let name = self.processes.process_name(pid).unwrap_or_else(|| "?".to_string());
            if self.migrate_process(backend.as_ref(), pid, flow, &path) {
                debug!(pid, process = %name, "Session migrated");
                addressed += 1;
            } else {
                warn!(pid, process = %name, "Session migration failed");
            }
        }

        if addressed < pids.len() {
            warn!(
                %flow,
                "{}",
                CoreError::PartialMigrationFailure { addressed, total: pids.len() }
            );
        } else {
            info!(%flow, count = addressed, "Active sessions migrated");
        }
        addressed
    }
}
