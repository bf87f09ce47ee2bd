//! Switch orchestrator: maps headset link state onto default endpoints.
//!
//! The orchestrator follows the monitor's link state through a small state
//! machine and, while enabled, moves the default speaker (and optionally
//! microphone) between the configured primary and secondary endpoints:
//!
//! | Link state     | New state          | Action                  |
//! |----------------|--------------------|-------------------------|
//! | `Online`       | `PrimaryConnected` | switch to primary       |
//! | `Offline`      | `SecondaryActive`  | switch to secondary     |
//! | `DongleAbsent` | `DongleAbsent`     | none                    |
//! | `Unknown`      | `Unknown`          | none                    |
//!
//! A switch for a flow only happens when both members of its pair are
//! configured, the current default is one of them, and the default is not
//! already the target. A default on some third device is a manual override
//! and is left alone.

use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::devices::{DeviceEnumerator, DevicesChanged};
use crate::endpoint::{DataFlow, same_endpoint};
use crate::error::{Error, Result};
use crate::link::{LinkState, LinkStateChanged, LinkStateSource};
use crate::routing::{EndpointSwitcher, RoutingDecision, SwitchDirection};
use crate::settings::{DevicePair, SettingsProvider};
use crate::state::{OrchestratorEvent, OrchestratorState, StatusSnapshot, SwitchRecord};

const EVENT_CAPACITY: usize = 64;

/// Decides when to switch endpoints and drives the router.
pub struct SwitchOrchestrator {
    router: Arc<dyn EndpointSwitcher>,
    devices: Arc<dyn DeviceEnumerator>,
    settings: Arc<dyn SettingsProvider>,
    monitor: Arc<dyn LinkStateSource>,
    /// Held across every decision and switch
    inner: Mutex<Inner>,
    events: broadcast::Sender<OrchestratorEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    state: OrchestratorState,
    link: LinkState,
    enabled: bool,
    /// Set by `start`, cleared by `stop`; notifications arriving after a
    /// stop are dropped
    active: bool,
    using_configured_device: bool,
    last_switch: Option<SwitchRecord>,
}

/// What one flow needs for a switch in a given direction.
#[derive(Debug, PartialEq, Eq)]
enum FlowPlan {
    /// Pair not fully configured
    Unconfigured,
    /// Current default is not a member of the pair
    Override { current_default: Option<String> },
    /// Already on the target
    InPlace,
    /// Move to this endpoint
    Move(String),
}

impl SwitchOrchestrator {
    /// Create an orchestrator in the `Stopped` state.
    #[must_use]
    pub fn new(
        router: Arc<dyn EndpointSwitcher>,
        devices: Arc<dyn DeviceEnumerator>,
        settings: Arc<dyn SettingsProvider>,
        monitor: Arc<dyn LinkStateSource>,
    ) -> Self {
        let enabled = settings.snapshot().enabled;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            router,
            devices,
            settings,
            monitor,
            inner: Mutex::new(Inner {
                state: OrchestratorState::Stopped,
                link: LinkState::Unknown,
                enabled,
                active: false,
                using_configured_device: true,
                last_switch: None,
            }),
            events,
            task: Mutex::new(None),
        }
    }

    /// Subscribe to orchestrator notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> OrchestratorState {
        self.inner.lock().state
    }

    /// Whether automatic switching is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    /// Whether the default speaker is one of the configured pair.
    #[must_use]
    pub fn using_configured_device(&self) -> bool {
        self.inner.lock().using_configured_device
    }

    /// The most recent switch attempt, automatic or forced.
    #[must_use]
    pub fn last_switch(&self) -> Option<SwitchRecord> {
        self.inner.lock().last_switch.clone()
    }

    /// Snapshot of everything a UI needs to render.
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        let inner = self.inner.lock();
        StatusSnapshot {
            state: inner.state,
            link: inner.link,
            enabled: inner.enabled,
            using_configured_device: inner.using_configured_device,
            router_supported: self.router.is_supported(),
            last_switch: inner.last_switch.clone(),
        }
    }

    /// Whether `start` has been called without a matching `stop`.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Enable or disable automatic switching.
    pub fn set_enabled(&self, enabled: bool) {
        let mut inner = self.inner.lock();
        if inner.enabled == enabled {
            return;
        }
        inner.enabled = enabled;
        info!(enabled, "Automatic switching toggled");
        self.emit(OrchestratorEvent::EnabledChanged { enabled, at: SystemTime::now() });
    }

    /// Subscribe to the monitor and device changes and begin following the
    /// link state.
    ///
    /// State is seeded from the monitor's current link state, which goes
    /// through the same decision path as a notification, so this call may
    /// block on router calls; async callers should run it on the blocking
    /// pool. The monitor is started if it is not already running.
    ///
    /// # Errors
    /// Returns an error if called outside a Tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut task = self.task.lock();
        if task.is_some() {
            debug!("Orchestrator already started");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::StateError(format!("no async runtime: {e}")))?;

        let link_rx = self.monitor.subscribe();
        let devices_rx = self.devices.subscribe();

        self.inner.lock().active = true;
        self.handle_link_state(self.monitor.current());
        self.recheck_configured_device();

        if self.monitor.ensure_running() {
            info!("Link monitor started by orchestrator");
        }

        *task = Some(runtime.spawn(run_notifications(Arc::downgrade(self), link_rx, devices_rx)));
        info!(state = %self.state(), "Orchestrator started");
        Ok(())
    }

    /// Unsubscribe and return to `Stopped`.
    ///
    /// The monitor keeps running; it may have other owners.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }

        let mut inner = self.inner.lock();
        inner.active = false;
        self.transition(&mut inner, OrchestratorState::Stopped);
        info!("Orchestrator stopped");
    }

    /// Apply a link state: update state and, if enabled, attempt a gated
    /// switch. Repeating the current state does nothing.
    pub fn handle_link_state(&self, link: LinkState) {
        let mut inner = self.inner.lock();
        self.apply_link(&mut inner, link);
    }

    /// Switch to the member implied by the raw link state, ignoring what the
    /// current default is.
    ///
    /// While started, state catches up with the link state read here so the
    /// status never pairs a new link with the old state; the notification
    /// that follows is then a repeat.
    ///
    /// Returns the switch record, or `None` when the link state implies no
    /// target or nothing is configured for it.
    pub fn force_apply(&self) -> Option<SwitchRecord> {
        let mut inner = self.inner.lock();
        let link = self.monitor.current();
        if inner.active {
            inner.link = link;
            self.transition(&mut inner, OrchestratorState::for_link(link));
        }

        let Some(direction) = SwitchDirection::for_link(link) else {
            warn!(%link, "Link state implies no target, nothing to apply");
            return None;
        };

        let settings = self.settings.snapshot();
        let decision = RoutingDecision {
            direction,
            speaker_target_id: settings.speaker.target(direction).map(String::from),
            mic_target_id: settings.microphone.target(direction).map(String::from),
        };

        if decision.is_empty() {
            warn!(%direction, "{}", Error::ConfigurationMissing("no endpoint for direction".into()));
            return None;
        }

        info!(%direction, "Forcing switch");
        let record = self.execute(&decision, true);
        self.record_switch(&mut inner, record.clone());
        Some(record)
    }

    /// Re-evaluate whether the default speaker is one of the configured pair.
    pub fn recheck_configured_device(&self) {
        let settings = self.settings.snapshot();
        let Some((primary, secondary)) = settings.speaker.resolve() else {
            return;
        };

        let current = self.devices.default_endpoint(DataFlow::Render).map(|e| e.id);
        let using = current
            .as_deref()
            .is_some_and(|id| same_endpoint(id, primary) || same_endpoint(id, secondary));

        let mut inner = self.inner.lock();
        self.update_configured_flag(&mut inner, using, current);
    }

    fn on_link_notification(&self, link: LinkState) {
        let mut inner = self.inner.lock();
        if !inner.active {
            debug!(%link, "Dropping link notification after stop");
            return;
        }
        self.apply_link(&mut inner, link);
    }

    fn apply_link(&self, inner: &mut Inner, link: LinkState) {
        inner.link = link;

        if !self.transition(inner, OrchestratorState::for_link(link)) {
            return;
        }

        if !inner.enabled {
            debug!(%link, "Switching disabled, state updated only");
            return;
        }

        let Some(direction) = SwitchDirection::for_link(link) else {
            return;
        };

        let settings = self.settings.snapshot();
        let speaker = self.plan_flow(&settings.speaker, DataFlow::Render, direction);
        let mic = self.plan_flow(&settings.microphone, DataFlow::Capture, direction);

        match &speaker {
            FlowPlan::Override { current_default } => {
                self.update_configured_flag(inner, false, current_default.clone());
            }
            FlowPlan::InPlace | FlowPlan::Move(_) => {
                let current = self.devices.default_endpoint(DataFlow::Render).map(|e| e.id);
                self.update_configured_flag(inner, true, current);
            }
            FlowPlan::Unconfigured => {}
        }

        let decision = RoutingDecision {
            direction,
            speaker_target_id: match speaker {
                FlowPlan::Move(id) => Some(id),
                _ => None,
            },
            mic_target_id: match mic {
                FlowPlan::Move(id) => Some(id),
                _ => None,
            },
        };

        if decision.is_empty() {
            debug!(%direction, "No flow needs to move");
            return;
        }

        let record = self.execute(&decision, false);
        self.record_switch(inner, record);
    }

    /// Move to `next`, emitting a notification. Returns `false` if already there.
    fn transition(&self, inner: &mut Inner, next: OrchestratorState) -> bool {
        if inner.state == next {
            return false;
        }
        let previous = std::mem::replace(&mut inner.state, next);
        info!(%previous, current = %next, "Orchestrator state changed");
        self.emit(OrchestratorEvent::StateChanged { previous, current: next, at: SystemTime::now() });
        true
    }

    fn plan_flow(&self, pair: &DevicePair, flow: DataFlow, direction: SwitchDirection) -> FlowPlan {
        let Some((primary, secondary)) = pair.resolve() else {
            debug!(%flow, "Pair not configured, skipping flow");
            return FlowPlan::Unconfigured;
        };

        let current = self.devices.default_endpoint(flow).map(|e| e.id);
        let Some(current_id) = current.as_deref() else {
            info!(%flow, "No default endpoint, leaving flow alone");
            return FlowPlan::Override { current_default: None };
        };

        if !same_endpoint(current_id, primary) && !same_endpoint(current_id, secondary) {
            info!(%flow, current = %current_id, "Default is not a configured device, respecting override");
            return FlowPlan::Override { current_default: current };
        }

        let target = match direction {
            SwitchDirection::ToPrimary => primary,
            SwitchDirection::ToSecondary => secondary,
        };

        if same_endpoint(current_id, target) {
            debug!(%flow, target = %target, "Already on target");
            FlowPlan::InPlace
        } else {
            FlowPlan::Move(target.to_string())
        }
    }

    fn execute(&self, decision: &RoutingDecision, forced: bool) -> SwitchRecord {
        let mut success = true;
        let mut parts = Vec::new();
        let mut target_name = None;

        if let Some(id) = &decision.speaker_target_id {
            let name = self.display_name(id);
            success &= self.switch_flow(id, DataFlow::Render);
            parts.push(format!("speaker {name}"));
            target_name = Some(name);
        }

        if let Some(id) = &decision.mic_target_id {
            let name = self.display_name(id);
            success &= self.switch_flow(id, DataFlow::Capture);
            parts.push(format!("microphone {name}"));
            target_name.get_or_insert(name);
        }

        let description = if success {
            format!("Switched {}: {}", decision.direction, parts.join(", "))
        } else {
            format!("Switch {} failed: {}", decision.direction, parts.join(", "))
        };

        SwitchRecord {
            direction: decision.direction,
            target_name: target_name.unwrap_or_default(),
            speaker_target_id: decision.speaker_target_id.clone(),
            success,
            forced,
            at: SystemTime::now(),
            description,
        }
    }

    fn switch_flow(&self, id: &str, flow: DataFlow) -> bool {
        if !self.router.set_default_endpoint(id, flow) {
            warn!(%flow, id = %id, "Failed to set default endpoint");
            return false;
        }

        let migrated = self.router.migrate_active_sessions(id, flow);
        debug!(%flow, migrated, "Active sessions addressed");
        true
    }

    fn record_switch(&self, inner: &mut Inner, record: SwitchRecord) {
        if record.success {
            info!(direction = %record.direction, target = %record.target_name, "{}", record.description);
        } else {
            warn!(direction = %record.direction, target = %record.target_name, "{}", record.description);
        }
        inner.last_switch = Some(record.clone());
        self.emit(OrchestratorEvent::SwitchPerformed(record));
    }

    fn update_configured_flag(&self, inner: &mut Inner, using: bool, current_default: Option<String>) {
        if inner.using_configured_device == using {
            return;
        }
        inner.using_configured_device = using;
        info!(using, current = ?current_default, "Configured device usage changed");
        self.emit(OrchestratorEvent::ConfiguredDeviceMismatch {
            using_configured_device: using,
            current_default,
            at: SystemTime::now(),
        });
    }

    fn display_name(&self, id: &str) -> String {
        self.devices.find(id).map_or_else(|| id.to_string(), |e| e.name)
    }

    fn emit(&self, event: OrchestratorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Drop for SwitchOrchestrator {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Forward monitor and device notifications to the orchestrator in order.
///
/// Router calls block, so each notification is handled on the blocking pool
/// and awaited before the next is read.
async fn run_notifications(
    orchestrator: Weak<SwitchOrchestrator>,
    mut link_rx: broadcast::Receiver<LinkStateChanged>,
    mut devices_rx: broadcast::Receiver<DevicesChanged>,
) {
    let mut devices_open = true;

    loop {
        tokio::select! {
            result = link_rx.recv() => {
                let link = match result {
                    Ok(change) => change.current,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Link notifications lagged, resyncing");
                        match orchestrator.upgrade() {
                            Some(this) => this.monitor.current(),
                            None => break,
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Link monitor closed its channel");
                        break;
                    }
                };

                let Some(this) = orchestrator.upgrade() else { break };
                if tokio::task::spawn_blocking(move || this.on_link_notification(link)).await.is_err() {
                    warn!("Link notification handler panicked");
                }
            }

            result = devices_rx.recv(), if devices_open => {
                if matches!(result, Err(RecvError::Closed)) {
                    debug!("Device enumeration closed its channel");
                    devices_open = false;
                    continue;
                }

                let Some(this) = orchestrator.upgrade() else { break };
                if tokio::task::spawn_blocking(move || this.recheck_configured_device()).await.is_err() {
                    warn!("Device change handler panicked");
                }
            }
        }
    }
}
