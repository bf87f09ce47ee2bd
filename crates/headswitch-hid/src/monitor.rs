//! Headset monitor - polls the probe on a dedicated thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use headswitch_core::{LinkState, LinkStateChanged, LinkStateSource};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::HidResult;
use crate::probe::LinkProbe;

/// Default time between probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// How long `stop` waits for the poll thread before detaching it.
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

const EVENT_CAPACITY: usize = 32;

/// Tracks the last resolved state and reports only actual changes.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    current: LinkState,
}

impl ChangeTracker {
    /// Last resolved state.
    #[must_use]
    pub fn current(&self) -> LinkState {
        self.current
    }

    /// Record a probe result. Returns a notification if it differs from the
    /// previous state.
    pub fn update(&mut self, next: LinkState) -> Option<LinkStateChanged> {
        if next == self.current {
            return None;
        }
        let previous = std::mem::replace(&mut self.current, next);
        Some(LinkStateChanged { previous, current: next, at: SystemTime::now() })
    }
}

struct Shared {
    probe: Mutex<Box<dyn LinkProbe>>,
    tracker: Mutex<ChangeTracker>,
    events: broadcast::Sender<LinkStateChanged>,
}

impl Shared {
    fn poll_once(&self) -> LinkState {
        let state = self.probe.lock().probe();

        // Sent under the tracker lock so notifications stay in order
        let mut tracker = self.tracker.lock();
        if let Some(change) = tracker.update(state) {
            info!(previous = %change.previous, current = %change.current, "Headset link state changed");
            let _ = self.events.send(change);
        }
        state
    }
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
}

/// Keeps the headset's link state current by polling a [`LinkProbe`].
pub struct HeadsetMonitor {
    shared: Arc<Shared>,
    interval: Duration,
    worker: Mutex<Option<Worker>>,
}

impl HeadsetMonitor {
    /// Create a monitor. Polling starts with [`start`](Self::start).
    pub fn new(probe: impl LinkProbe + 'static, interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                probe: Mutex::new(Box::new(probe)),
                tracker: Mutex::new(ChangeTracker::default()),
                events,
            }),
            interval,
            worker: Mutex::new(None),
        }
    }

    /// Whether the poll thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(|w| !w.handle.is_finished())
    }

    /// Probe once on the calling thread and update the tracked state.
    pub fn poll_once(&self) -> LinkState {
        self.shared.poll_once()
    }

    /// Start the poll thread.
    ///
    /// Returns `false` if it was already running.
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned.
    pub fn start(&self) -> HidResult<bool> {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return Ok(false);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&self.shared);
        let interval = self.interval;
        let thread_cancel = Arc::clone(&cancel);

        let handle = std::thread::Builder::new()
            .name("headset-monitor".to_string())
            .spawn(move || {
                debug!(interval_ms = interval.as_millis(), "Headset monitor running");
                while !thread_cancel.load(Ordering::Acquire) {
                    shared.poll_once();
                    std::thread::park_timeout(interval);
                }
                debug!("Headset monitor exiting");
            })?;

        *worker = Some(Worker { handle, cancel });
        info!("Headset monitor started");
        Ok(true)
    }

    /// Stop the poll thread, waiting up to a second for it to exit.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        worker.cancel.store(true, Ordering::Release);
        worker.handle.thread().unpark();

        let deadline = Instant::now() + STOP_TIMEOUT;
        while !worker.handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("Headset monitor did not stop in time, detaching");
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        if worker.handle.join().is_err() {
            error!("Headset monitor thread panicked");
        }
        info!("Headset monitor stopped");
    }
}

impl LinkStateSource for HeadsetMonitor {
    fn current(&self) -> LinkState {
        self.shared.tracker.lock().current()
    }

    fn subscribe(&self) -> broadcast::Receiver<LinkStateChanged> {
        self.shared.events.subscribe()
    }

    fn ensure_running(&self) -> bool {
        match self.start() {
            Ok(started) => started,
            Err(e) => {
                error!(error = %e, "Failed to start headset monitor");
                false
            }
        }
    }
}

impl Drop for HeadsetMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use proptest::prelude::*;

    use super::*;

    struct ScriptedProbe {
        states: Arc<Mutex<VecDeque<LinkState>>>,
        last: LinkState,
    }

    impl LinkProbe for ScriptedProbe {
        fn probe(&mut self) -> LinkState {
            if let Some(next) = self.states.lock().pop_front() {
                self.last = next;
            }
            self.last
        }
    }

    fn scripted(states: &[LinkState]) -> (HeadsetMonitor, Arc<Mutex<VecDeque<LinkState>>>) {
        let queue = Arc::new(Mutex::new(states.iter().copied().collect::<VecDeque<_>>()));
        let probe = ScriptedProbe { states: queue.clone(), last: LinkState::Unknown };
        (HeadsetMonitor::new(probe, Duration::from_millis(5)), queue)
    }

    fn link_state() -> impl Strategy<Value = LinkState> {
        prop_oneof![
            Just(LinkState::DongleAbsent),
            Just(LinkState::Offline),
            Just(LinkState::Online),
            Just(LinkState::Unknown),
        ]
    }

    proptest! {
        #[test]
        fn test_notifies_iff_changed(states in proptest::collection::vec(link_state(), 0..64)) {
            let mut tracker = ChangeTracker::default();
            let mut previous = LinkState::Unknown;

            for state in states {
                let change = tracker.update(state);
                prop_assert_eq!(change.is_some(), state != previous);
                if let Some(change) = change {
                    prop_assert_eq!(change.previous, previous);
                    prop_assert_eq!(change.current, state);
                }
                previous = state;
            }
        }
    }

    #[test]
    fn test_poll_once_notifies_in_order() {
        let (monitor, _) = scripted(&[
            LinkState::Offline,
            LinkState::Offline,
            LinkState::Online,
            LinkState::Online,
            LinkState::DongleAbsent,
        ]);
        let mut rx = monitor.subscribe();

        for _ in 0..5 {
            monitor.poll_once();
        }

        let seen: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).map(|c| c.current).collect();
        assert_eq!(seen, vec![LinkState::Offline, LinkState::Online, LinkState::DongleAbsent]);
        assert_eq!(monitor.current(), LinkState::DongleAbsent);
    }

    #[test]
    fn test_initial_unknown_is_silent() {
        let (monitor, _) = scripted(&[LinkState::Unknown]);
        let mut rx = monitor.subscribe();
        monitor.poll_once();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_thread_polls_until_stopped() {
        let (monitor, queue) = scripted(&[LinkState::Online]);
        let mut rx = monitor.subscribe();

        assert!(monitor.start().expect("Failed to start monitor"));
        assert!(!monitor.start().expect("Failed to start monitor"));
        assert!(monitor.is_running());

        let deadline = Instant::now() + Duration::from_secs(2);
        let change = loop {
            if let Ok(change) = rx.try_recv() {
                break change;
            }
            assert!(Instant::now() < deadline, "no notification from poll thread");
            std::thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(change.current, LinkState::Online);

        monitor.stop();
        assert!(!monitor.is_running());

        // Nothing is polled after stop
        queue.lock().push_back(LinkState::Offline);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(monitor.current(), LinkState::Online);
    }

    #[test]
    fn test_ensure_running_starts_once() {
        let (monitor, _) = scripted(&[]);
        assert!(monitor.ensure_running());
        assert!(!monitor.ensure_running());
        monitor.stop();
    }
}
