//! Routing facility seam and capability discovery.
//!
//! The OS interfaces that change default endpoints differ between releases.
//! Each shape is wrapped as a [`PolicyBackend`] behind a [`Candidate`]; the
//! router activates candidates in priority order and keeps the first that
//! works.

use headswitch_core::{DataFlow, DeviceRole};
use tracing::{debug, info};

use crate::error::AudioResult;

/// An activated routing facility.
pub trait PolicyBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Make the endpoint with this routing id the default for `role`.
    ///
    /// # Errors
    /// Returns the platform status on failure.
    fn set_default(&self, routing_id: &str, role: DeviceRole) -> AudioResult<()>;

    /// Whether per-process persisted endpoints are available.
    fn supports_per_process(&self) -> bool;

    /// Persist `device_path` as the default for `pid` on `flow` and `role`.
    ///
    /// # Errors
    /// Returns an error if per-process endpoints are unsupported or the
    /// platform call fails.
    fn set_process_default(
        &self,
        pid: u32,
        flow: DataFlow,
        role: DeviceRole,
        device_path: &str,
    ) -> AudioResult<()>;
}

/// Reports which processes currently have active audio sessions.
pub trait SessionSource: Send + Sync {
    /// Owning pids of active sessions on any active endpoint of `flow`.
    ///
    /// May contain duplicates and pid 0.
    ///
    /// # Errors
    /// Returns an error if sessions cannot be enumerated.
    fn active_session_pids(&self, flow: DataFlow) -> AudioResult<Vec<u32>>;
}

/// A routing facility that may or may not exist on this system.
pub struct Candidate {
    pub name: &'static str,
    pub activate: Box<dyn Fn() -> AudioResult<Box<dyn PolicyBackend>> + Send + Sync>,
}

impl Candidate {
    /// Wrap an activation function.
    pub fn new(
        name: &'static str,
        activate: impl Fn() -> AudioResult<Box<dyn PolicyBackend>> + Send + Sync + 'static,
    ) -> Self {
        Self { name, activate: Box::new(activate) }
    }
}

/// Activate candidates in order, returning the first that succeeds.
pub fn activate_first(candidates: &[Candidate]) -> Option<Box<dyn PolicyBackend>> {
    for candidate in candidates {
        match (candidate.activate)() {
            Ok(backend) => {
                info!(provider = candidate.name, "Audio routing provider activated");
                return Some(backend);
            }
            Err(e) => debug!(provider = candidate.name, error = %e, "Audio routing provider unavailable"),
        }
    }
    None
}

/// Routing candidates for the running platform, most capable first.
#[must_use]
pub fn platform_candidates() -> Vec<Candidate> {
    #[cfg(windows)]
    {
        crate::win32::candidates()
    }

    #[cfg(not(windows))]
    {
        Vec::new()
    }
}

/// Session source for the running platform.
#[must_use]
pub fn platform_sessions() -> std::sync::Arc<dyn SessionSource> {
    #[cfg(windows)]
    {
        std::sync::Arc::new(crate::win32::MmSessionSource)
    }

    #[cfg(not(windows))]
    {
        std::sync::Arc::new(NoSessions)
    }
}

#[cfg(not(windows))]
struct NoSessions;

#[cfg(not(windows))]
impl SessionSource for NoSessions {
    fn active_session_pids(&self, _flow: DataFlow) -> AudioResult<Vec<u32>> {
        Err(crate::error::AudioError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::AudioError;

    struct Named(&'static str);

    impl PolicyBackend for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn set_default(&self, _routing_id: &str, _role: DeviceRole) -> AudioResult<()> {
            Ok(())
        }

        fn supports_per_process(&self) -> bool {
            false
        }

        fn set_process_default(&self, _: u32, _: DataFlow, _: DeviceRole, _: &str) -> AudioResult<()> {
            Err(AudioError::NoPerProcess(self.0))
        }
    }

    #[test]
    fn test_first_activating_candidate_wins() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = |attempts: &Arc<AtomicUsize>| {
            let attempts = attempts.clone();
            move || attempts.fetch_add(1, Ordering::SeqCst)
        };

        let first = counter(&attempts);
        let second = counter(&attempts);
        let third = counter(&attempts);
        let candidates = vec![
            Candidate::new("broken", move || {
                first();
                Err(AudioError::Platform { context: "CoCreateInstance", code: -2_147_221_164 })
            }),
            Candidate::new("working", move || {
                second();
                Ok(Box::new(Named("working")) as Box<dyn PolicyBackend>)
            }),
            Candidate::new("never", move || {
                third();
                Ok(Box::new(Named("never")) as Box<dyn PolicyBackend>)
            }),
        ];

        let backend = activate_first(&candidates).expect("Failed to activate a candidate");
        assert_eq!(backend.name(), "working");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_no_candidates() {
        assert!(activate_first(&[]).is_none());
    }
}
