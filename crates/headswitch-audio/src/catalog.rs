//! Device catalog - endpoint enumeration with change notifications.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use headswitch_core::{DataFlow, DeviceEnumerator, DevicesChanged, Endpoint};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace};

use crate::error::AudioResult;

/// Default time between rescans on the watcher thread.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Lists active endpoints straight from the OS.
pub trait EndpointSource: Send + Sync {
    /// Active endpoints for a flow with their default flag set.
    ///
    /// # Errors
    /// Returns an error if enumeration fails.
    fn scan(&self, flow: DataFlow) -> AudioResult<Vec<Endpoint>>;
}

/// Endpoint source for the running platform.
#[must_use]
pub fn platform_source() -> Arc<dyn EndpointSource> {
    #[cfg(windows)]
    {
        Arc::new(crate::win32::MmEndpointSource)
    }

    #[cfg(not(windows))]
    {
        Arc::new(NoEndpoints)
    }
}

#[cfg(not(windows))]
struct NoEndpoints;

#[cfg(not(windows))]
impl EndpointSource for NoEndpoints {
    fn scan(&self, _flow: DataFlow) -> AudioResult<Vec<Endpoint>> {
        Err(crate::error::AudioError::Unsupported)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Snapshot {
    render: Vec<Endpoint>,
    capture: Vec<Endpoint>,
}

impl Snapshot {
    fn get(&self, flow: DataFlow) -> &[Endpoint] {
        match flow {
            DataFlow::Render => &self.render,
            DataFlow::Capture => &self.capture,
        }
    }
}

struct Shared {
    source: Arc<dyn EndpointSource>,
    snapshot: RwLock<Snapshot>,
    events: broadcast::Sender<DevicesChanged>,
}

impl Shared {
    fn scan_sorted(&self, flow: DataFlow) -> AudioResult<Vec<Endpoint>> {
        let mut endpoints = self.source.scan(flow)?;
        endpoints.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(endpoints)
    }

    fn refresh(&self) -> bool {
        let scanned = self
            .scan_sorted(DataFlow::Render)
            .and_then(|render| Ok(Snapshot { render, capture: self.scan_sorted(DataFlow::Capture)? }));

        let next = match scanned {
            Ok(next) => next,
            Err(e) => {
                trace!(error = %e, "Endpoint scan failed, keeping previous list");
                return false;
            }
        };

        let mut snapshot = self.snapshot.write();
        if *snapshot == next {
            return false;
        }

        debug!(render = next.render.len(), capture = next.capture.len(), "Audio endpoints changed");
        *snapshot = next;
        let _ = self.events.send(DevicesChanged);
        true
    }
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
}

/// Caches the endpoint list and reports changes to it.
pub struct DeviceCatalog {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl DeviceCatalog {
    /// Create a catalog and take an initial snapshot.
    pub fn new(source: Arc<dyn EndpointSource>) -> Self {
        let (events, _) = broadcast::channel(16);
        let shared = Arc::new(Shared { source, snapshot: RwLock::new(Snapshot::default()), events });
        shared.refresh();
        Self { shared, worker: Mutex::new(None) }
    }

    /// Rescan now. Returns `true` and notifies subscribers if anything changed.
    pub fn refresh(&self) -> bool {
        self.shared.refresh()
    }

    /// Start rescanning on a background thread.
    ///
    /// Returns `false` if already watching.
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned.
    pub fn start_watching(&self, interval: Duration) -> AudioResult<bool> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(false);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);
        let shared = Arc::clone(&self.shared);

        let handle = std::thread::Builder::new().name("device-catalog".to_string()).spawn(move || {
            while !thread_cancel.load(Ordering::Acquire) {
                std::thread::park_timeout(interval);
                if thread_cancel.load(Ordering::Acquire) {
                    break;
                }
                shared.refresh();
            }
        })?;

        *worker = Some(Worker { handle, cancel });
        info!(interval_ms = interval.as_millis(), "Watching audio endpoints");
        Ok(true)
    }

    /// Stop the watcher thread.
    pub fn stop_watching(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        worker.cancel.store(true, Ordering::Release);
        worker.handle.thread().unpark();
        if worker.handle.join().is_err() {
            error!("Device catalog thread panicked");
        }
    }
}

impl DeviceEnumerator for DeviceCatalog {
    /// Live scan, falling back to the last snapshot if the OS call fails.
    fn endpoints(&self, flow: DataFlow) -> Vec<Endpoint> {
        match self.shared.scan_sorted(flow) {
            Ok(endpoints) => endpoints,
            Err(e) => {
                trace!(%flow, error = %e, "Live scan failed, using cached endpoints");
                self.shared.snapshot.read().get(flow).to_vec()
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<DevicesChanged> {
        self.shared.events.subscribe()
    }
}

impl Drop for DeviceCatalog {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::error::AudioError;

    #[derive(Default)]
    struct FakeSource {
        render: Mutex<Vec<Endpoint>>,
        capture: Mutex<Vec<Endpoint>>,
        failing: AtomicBool,
    }

    impl EndpointSource for FakeSource {
        fn scan(&self, flow: DataFlow) -> AudioResult<Vec<Endpoint>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(AudioError::Platform { context: "EnumAudioEndpoints", code: -1 });
            }
            Ok(match flow {
                DataFlow::Render => self.render.lock().clone(),
                DataFlow::Capture => self.capture.lock().clone(),
            })
        }
    }

    fn endpoint(id: &str, is_default: bool) -> Endpoint {
        Endpoint { id: id.into(), name: format!("Speakers {id}"), flow: DataFlow::Render, is_default }
    }

    fn source() -> Arc<FakeSource> {
        let source = FakeSource::default();
        *source.render.lock() = vec![endpoint("W", false), endpoint("D", true)];
        Arc::new(source)
    }

    #[test]
    fn test_default_endpoint_from_scan() {
        let catalog = DeviceCatalog::new(source());
        let default = catalog.default_endpoint(DataFlow::Render).expect("Failed to find default");
        assert_eq!(default.id, "D");
        assert!(catalog.default_endpoint(DataFlow::Capture).is_none());
    }

    #[test]
    fn test_refresh_reports_default_change() {
        let source = source();
        let catalog = DeviceCatalog::new(source.clone());
        let mut rx = catalog.subscribe();

        assert!(!catalog.refresh());
        assert!(rx.try_recv().is_err());

        *source.render.lock() = vec![endpoint("W", true), endpoint("D", false)];
        assert!(catalog.refresh());
        assert_eq!(rx.try_recv().ok(), Some(DevicesChanged));
    }

    #[test]
    fn test_reordering_is_not_a_change() {
        let source = source();
        let catalog = DeviceCatalog::new(source.clone());

        *source.render.lock() = vec![endpoint("D", true), endpoint("W", false)];
        assert!(!catalog.refresh());
    }

    #[test]
    fn test_failed_scan_falls_back_to_cache() {
        let source = source();
        let catalog = DeviceCatalog::new(source.clone());
        source.failing.store(true, Ordering::SeqCst);

        assert!(!catalog.refresh());
        assert_eq!(catalog.endpoints(DataFlow::Render).len(), 2);
        assert!(catalog.find("W").is_some());
    }

    #[test]
    fn test_watcher_notifies() {
        let source = source();
        let catalog = DeviceCatalog::new(source.clone());
        let mut rx = catalog.subscribe();
        assert!(catalog.start_watching(Duration::from_millis(5)).expect("Failed to start watcher"));
        assert!(!catalog.start_watching(Duration::from_millis(5)).expect("Failed to start watcher"));

        source.render.lock().push(endpoint("Z", false));

        let deadline = Instant::now() + Duration::from_secs(2);
        while rx.try_recv().is_err() {
            assert!(Instant::now() < deadline, "no change notification");
            std::thread::sleep(Duration::from_millis(5));
        }
        catalog.stop_watching();
    }
}
