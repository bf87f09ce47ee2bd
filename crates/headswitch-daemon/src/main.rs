//! Headswitch Daemon - headset link driven audio switching.
//!
//! Polls the wireless receiver for the headset's link state and moves the
//! default speaker and microphone between the wireless and wired endpoints.
//! Optionally drives an external audio relay so its output follows as well.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod signals;

use headswitch_audio::{DeviceCatalog, EndpointRouter, catalog::DEFAULT_WATCH_INTERVAL, platform_source};
use headswitch_core::{
    DeviceEnumerator, DevicePair, EndpointSwitcher, LinkStateSource, OrchestratorEvent, OrchestratorState,
    SettingsProvider, SharedSettings, SwitchDirection, SwitchOrchestrator,
};
use headswitch_hid::{HeadsetMonitor, HidApiBackend, LinkStateProbe};
use headswitch_ipc::{ProxyClient, RelayController, RelayLaunch};

use crate::config::{Config, RelayConfig};

/// Crates whose log level follows `daemon.log_level`.
const LOG_TARGETS: &[&str] =
    &["headswitch_daemon", "headswitch_core", "headswitch_hid", "headswitch_audio", "headswitch_ipc"];

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config()?;

    let mut filter = EnvFilter::from_default_env();
    for target in LOG_TARGETS {
        filter = filter.add_directive(
            format!("{target}={}", config.daemon.log_level)
                .parse()
                .with_context(|| format!("Invalid daemon.log_level: {}", config.daemon.log_level))?,
        );
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Headswitch daemon");

    // Receiver link monitor
    let profile = config.receiver.profile()?;
    info!(
        vendor_id = %format!("{:04x}", profile.vendor_id),
        product_id = %format!("{:04x}", profile.product_id),
        "Receiver configured"
    );
    let backend = HidApiBackend::new().context("Failed to initialize HID")?;
    let monitor = Arc::new(HeadsetMonitor::new(LinkStateProbe::new(backend, profile), config.receiver.poll_interval()));
    let link_source: Arc<dyn LinkStateSource> = Arc::clone(&monitor) as Arc<dyn LinkStateSource>;

    // Endpoint enumeration and routing
    let catalog = Arc::new(DeviceCatalog::new(platform_source()));
    catalog.start_watching(DEFAULT_WATCH_INTERVAL).context("Failed to start device watcher")?;
    let devices: Arc<dyn DeviceEnumerator> = Arc::clone(&catalog) as Arc<dyn DeviceEnumerator>;

    let router = Arc::new(EndpointRouter::platform());
    match router.provider_name() {
        Some(name) => info!(provider = name, "Endpoint routing available"),
        None => warn!("No endpoint routing provider on this system, switching disabled"),
    }
    debug!(supported = router.is_supported(), "Router status");

    let settings = SharedSettings::new(config.switching.to_settings());
    let orchestrator =
        Arc::new(SwitchOrchestrator::new(router, devices, Arc::new(settings.clone()), link_source));
    let mut events = orchestrator.subscribe();

    // Seeding may switch endpoints, which blocks on the router
    let starting = Arc::clone(&orchestrator);
    tokio::task::spawn_blocking(move || starting.start())
        .await
        .context("Orchestrator start task failed")?
        .context("Failed to start orchestrator")?;
    info!(state = %orchestrator.state(), enabled = orchestrator.is_enabled(), "Orchestrator running");

    // Optional relay
    let relay = if config.relay.enabled {
        start_relay(&config, &settings, orchestrator.state())
    } else {
        None
    };
    let mut relay_events = relay.as_ref().map(|r| r.subscribe());

    let mut shutdown_rx = signals::setup_signal_handlers()?;

    info!("Daemon running. Press Ctrl+C to exit.");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => handle_event(&event, relay.as_deref(), &settings, orchestrator.is_enabled()).await,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dropped orchestrator notifications"),
                Err(RecvError::Closed) => {
                    error!("Orchestrator notifications closed");
                    break;
                }
            },

            Some(status) = recv_relay(&mut relay_events) => {
                info!(
                    running = status.running,
                    output = ?status.output_device,
                    mic_enabled = status.mic_enabled,
                    "Relay status changed"
                );
            }

            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down...");
    orchestrator.stop();
    if let Some(relay) = &relay {
        relay.shutdown().await;
    }
    catalog.stop_watching();
    monitor.stop();

    info!("Headswitch daemon stopped");
    Ok(())
}

/// Next relay status change, or never when there is no relay.
async fn recv_relay(
    rx: &mut Option<tokio::sync::broadcast::Receiver<headswitch_ipc::ProxyStatus>>,
) -> Option<headswitch_ipc::ProxyStatus> {
    match rx {
        Some(rx) => loop {
            match rx.recv().await {
                Ok(status) => return Some(status),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return None,
            }
        },
        None => std::future::pending().await,
    }
}

/// Log an orchestrator notification and keep the relay output on the
/// endpoint the state implies. The relay only moves while automatic
/// switching is enabled.
async fn handle_event(
    event: &OrchestratorEvent,
    relay: Option<&RelayController>,
    settings: &SharedSettings,
    switching_enabled: bool,
) {
    match event {
        OrchestratorEvent::StateChanged { previous, current, .. } => {
            info!(%previous, %current, "Switch state changed");
            if !switching_enabled {
                return;
            }

            let target = direction_for(*current).and_then(|d| settings.snapshot().speaker.target(d).map(String::from));
            if let (Some(relay), Some(target)) = (relay, target) {
                if let Err(e) = relay.set_output(&target).await {
                    warn!(target = %target, error = %e.user_message(), "Failed to move relay output");
                }
            }
        }

        OrchestratorEvent::SwitchPerformed(record) => {
            if record.success {
                info!(direction = %record.direction, forced = record.forced, "{}", record.description);
            } else {
                warn!(direction = %record.direction, forced = record.forced, "{}", record.description);
            }
        }

        OrchestratorEvent::EnabledChanged { enabled, .. } => {
            info!(enabled, "Automatic switching toggled");
        }

        OrchestratorEvent::ConfiguredDeviceMismatch { using_configured_device, current_default, .. } => {
            if *using_configured_device {
                info!("Default speaker is back on the configured pair");
            } else {
                warn!(current_default = ?current_default, "Default speaker is outside the configured pair, leaving it alone");
            }
        }
    }
}

/// Direction implied by an orchestrator state.
fn direction_for(state: OrchestratorState) -> Option<SwitchDirection> {
    match state {
        OrchestratorState::PrimaryConnected => Some(SwitchDirection::ToPrimary),
        OrchestratorState::SecondaryActive => Some(SwitchDirection::ToSecondary),
        _ => None,
    }
}

/// Member of `pair` the relay should use in `state`, falling back to the
/// secondary member when the link state implies no direction.
fn pair_member(pair: &DevicePair, state: OrchestratorState) -> Option<String> {
    let direction = direction_for(state).unwrap_or(SwitchDirection::ToSecondary);
    pair.target(direction).map(String::from)
}

fn start_relay(config: &Config, settings: &SharedSettings, state: OrchestratorState) -> Option<Arc<RelayController>> {
    let RelayConfig { program, endpoint, capture_device, mic_output_device, buffer_ms, .. } = &config.relay;

    let Some(speaker_in) = capture_device.clone() else {
        warn!("Relay enabled but relay.capture_device is not set, not starting it");
        return None;
    };

    let snapshot = settings.snapshot();
    let Some(speaker_out) = pair_member(&snapshot.speaker, state) else {
        warn!("No speaker to relay to, not starting relay");
        return None;
    };
    let mic = mic_output_device
        .clone()
        .and_then(|mic_out| pair_member(&snapshot.microphone, state).map(|mic_in| (mic_in, mic_out)));

    let launch = RelayLaunch { program: program.clone(), speaker_in, speaker_out, mic, buffer_ms: *buffer_ms };
    let relay = Arc::new(RelayController::new(ProxyClient::new(endpoint.clone())));
    if let Err(e) = relay.launch(&launch) {
        error!(program = %launch.program.display(), error = %e, "Failed to launch relay");
        return None;
    }
    Some(relay)
}
