//! Relay process lifecycle and cached status.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use headswitch_core::routing_id;
use parking_lot::{Mutex, RwLock};
use tokio::process::Command;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::ProxyClient;
use crate::error::IpcResult;
use crate::messages::{ProxyCommand, ProxyStatus};

/// How long the relay gets to exit after `Stop` before it is killed.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Relay buffer when none is configured.
pub const DEFAULT_BUFFER_MS: u32 = 10;

/// How to start the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayLaunch {
    pub program: PathBuf,
    /// Virtual device the relay captures speaker audio from
    pub speaker_in: String,
    /// Real device the relay renders to
    pub speaker_out: String,
    /// Physical microphone and virtual mic output, when the mic path is used
    pub mic: Option<(String, String)>,
    pub buffer_ms: u32,
}

impl RelayLaunch {
    /// Command-line arguments, with device ids in the routing namespace.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--speaker-in".to_string(),
            routing_id(&self.speaker_in).to_string(),
            "--speaker-out".to_string(),
            routing_id(&self.speaker_out).to_string(),
        ];

        if let Some((mic_in, mic_out)) = &self.mic {
            args.extend([
                "--mic-in".to_string(),
                routing_id(mic_in).to_string(),
                "--mic-out".to_string(),
                routing_id(mic_out).to_string(),
            ]);
        }

        args.extend(["--buffer".to_string(), self.buffer_ms.to_string()]);
        args
    }
}

struct Shared {
    status: RwLock<ProxyStatus>,
    events: broadcast::Sender<ProxyStatus>,
}

impl Shared {
    fn update(&self, f: impl FnOnce(&mut ProxyStatus)) {
        let snapshot = {
            let mut status = self.status.write();
            let before = status.clone();
            f(&mut status);
            if *status == before {
                return;
            }
            status.clone()
        };
        let _ = self.events.send(snapshot);
    }
}

struct RelayProcess {
    watcher: JoinHandle<()>,
    kill: oneshot::Sender<()>,
}

/// Launches the relay, keeps a cached view of its status, and forwards
/// control commands.
pub struct RelayController {
    client: ProxyClient,
    shared: Arc<Shared>,
    process: Mutex<Option<RelayProcess>>,
}

impl RelayController {
    /// Controller talking to the relay through `client`.
    #[must_use]
    pub fn new(client: ProxyClient) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            client,
            shared: Arc::new(Shared { status: RwLock::new(ProxyStatus::default()), events }),
            process: Mutex::new(None),
        }
    }

    /// Cached relay status.
    #[must_use]
    pub fn status(&self) -> ProxyStatus {
        self.shared.status.read().clone()
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ProxyStatus> {
        self.shared.events.subscribe()
    }

    /// Whether a relay process started by this controller is alive.
    #[must_use]
    pub fn is_process_running(&self) -> bool {
        self.process.lock().as_ref().is_some_and(|p| !p.watcher.is_finished())
    }

    /// Start the relay process and watch for it exiting.
    ///
    /// Does nothing if a relay started here is still running.
    ///
    /// # Errors
    /// Returns an error if the process cannot be spawned.
    pub fn launch(&self, launch: &RelayLaunch) -> IpcResult<()> {
        let mut process = self.process.lock();
        if process.as_ref().is_some_and(|p| !p.watcher.is_finished()) {
            debug!("Relay already running");
            return Ok(());
        }

        let args = launch.args();
        let mut child = Command::new(&launch.program).args(&args).kill_on_drop(true).spawn()?;
        info!(program = %launch.program.display(), pid = ?child.id(), args = ?args, "Relay started");

        self.shared.update(|status| {
            *status = ProxyStatus {
                running: true,
                output_device: Some(routing_id(&launch.speaker_out).to_string()),
                mic_enabled: launch.mic.is_some(),
                mic_input_device: launch.mic.as_ref().map(|(mic_in, _)| routing_id(mic_in).to_string()),
            };
        });

        let (kill, kill_rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let watcher = tokio::spawn(async move {
            tokio::select! {
                result = child.wait() => match result {
                    Ok(exit) if exit.success() => info!("Relay exited"),
                    Ok(exit) => warn!(status = %exit, "Relay exited unexpectedly"),
                    Err(e) => error!(error = %e, "Failed to wait on relay"),
                },
                _ = kill_rx => {
                    warn!("Relay did not stop in time, killing");
                    if let Err(e) = child.kill().await {
                        error!(error = %e, "Failed to kill relay");
                    }
                }
            }
            shared.update(|status| status.running = false);
        });

        *process = Some(RelayProcess { watcher, kill });
        Ok(())
    }

    /// Send a command and fold it into the cached status on success.
    ///
    /// # Errors
    /// Returns the client error; the cached status is left unchanged.
    pub async fn send(&self, command: ProxyCommand) -> IpcResult<()> {
        let command = command.into_routing();
        let response = self.client.send(command.clone()).await?;
        self.shared.update(|status| {
            status.apply_command(&command);
            status.apply_response(&response);
        });
        Ok(())
    }

    /// Switch the relay's speaker output.
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub async fn set_output(&self, device_id: &str) -> IpcResult<()> {
        self.send(ProxyCommand::SetOutput { device_id: device_id.to_string() }).await
    }

    /// Switch the relay's microphone input.
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub async fn set_mic_input(&self, device_id: &str) -> IpcResult<()> {
        self.send(ProxyCommand::SetMicInput { device_id: device_id.to_string() }).await
    }

    /// Enable or disable the relay's microphone path.
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub async fn enable_mic(&self, enabled: bool) -> IpcResult<()> {
        self.send(ProxyCommand::EnableMic { enabled }).await
    }

    /// Refresh the cached status from the relay.
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub async fn refresh(&self) -> IpcResult<ProxyStatus> {
        self.send(ProxyCommand::GetStatus).await?;
        Ok(self.status())
    }

    /// Stop the relay: ask politely, wait up to [`STOP_GRACE`], then kill a
    /// process started here.
    pub async fn shutdown(&self) {
        if let Err(e) = self.client.stop().await {
            debug!(error = %e, "Relay did not accept Stop");
        }

        let process = self.process.lock().take();
        if let Some(RelayProcess { mut watcher, kill }) = process {
            if tokio::time::timeout(STOP_GRACE, &mut watcher).await.is_err() {
                let _ = kill.send(());
                if watcher.await.is_err() {
                    error!("Relay watcher task failed");
                }
            }
        }

        self.shared.update(|status| status.running = false);
        info!("Relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch() -> RelayLaunch {
        RelayLaunch {
            program: PathBuf::from("audio-relay"),
            speaker_in: r"\\?\SWD#MMDEVAPI#{0.0.0.00000000}.{cable}#{e6327cad-dcec-4949-ae8a-991e976a79d2}".into(),
            speaker_out: "{0.0.0.00000000}.{headset}".into(),
            mic: None,
            buffer_ms: DEFAULT_BUFFER_MS,
        }
    }

    #[test]
    fn test_launch_args_without_mic() {
        assert_eq!(
            launch().args(),
            vec![
                "--speaker-in",
                "{0.0.0.00000000}.{cable}",
                "--speaker-out",
                "{0.0.0.00000000}.{headset}",
                "--buffer",
                "10",
            ]
        );
    }

    #[test]
    fn test_launch_args_with_mic() {
        let launch = RelayLaunch {
            mic: Some(("{0.0.1.00000000}.{mic}".into(), "{0.0.0.00000000}.{cable-in}".into())),
            buffer_ms: 20,
            ..launch()
        };
        let args = launch.args();
        assert_eq!(&args[4..], &["--mic-in", "{0.0.1.00000000}.{mic}", "--mic-out", "{0.0.0.00000000}.{cable-in}", "--buffer", "20"]);
    }

    #[cfg(unix)]
    mod unix {
        use assert_matches::assert_matches;

        use super::*;
        use crate::client::tests::fixture_relay;
        use crate::error::IpcError;

        #[tokio::test]
        async fn test_success_updates_cache_and_notifies() {
            let dir = tempfile::tempdir().expect("Failed to create temp dir");
            let (path, _received) = fixture_relay(&dir, vec![r#"{"success":true,"message":"Output changed"}"#]);
            let controller = RelayController::new(ProxyClient::new(path));
            let mut rx = controller.subscribe();

            controller
                .set_output(r"\\?\SWD#MMDEVAPI#{0.0.0.00000000}.{wired}#{e6327cad-dcec-4949-ae8a-991e976a79d2}")
                .await
                .expect("Failed to set output");

            assert_eq!(controller.status().output_device.as_deref(), Some("{0.0.0.00000000}.{wired}"));
            let event = rx.try_recv().expect("Failed to receive status change");
            assert_eq!(event, controller.status());
        }

        #[tokio::test]
        async fn test_failure_leaves_cache_untouched() {
            let dir = tempfile::tempdir().expect("Failed to create temp dir");
            let (path, _received) = fixture_relay(&dir, vec![r#"{"success":false,"message":"Device busy"}"#]);
            let controller = RelayController::new(ProxyClient::new(path));
            let mut rx = controller.subscribe();

            let result = controller.enable_mic(true).await;

            assert_matches!(result, Err(IpcError::Rejected(_)));
            assert_eq!(controller.status(), ProxyStatus::default());
            assert!(rx.try_recv().is_err());
        }

        #[tokio::test]
        async fn test_refresh_reads_echoed_state() {
            let dir = tempfile::tempdir().expect("Failed to create temp dir");
            let (path, _received) = fixture_relay(
                &dir,
                vec![r#"{"success":true,"message":"Status retrieved","running":true,"output_device":"{0.0.0.00000000}.{w}","mic_enabled":true,"mic_input_device":"{0.0.1.00000000}.{m}"}"#],
            );
            let controller = RelayController::new(ProxyClient::new(path));

            let status = controller.refresh().await.expect("Failed to refresh");
            assert!(status.running);
            assert!(status.mic_enabled);
            assert_eq!(status.mic_input_device.as_deref(), Some("{0.0.1.00000000}.{m}"));
        }

        #[tokio::test]
        async fn test_unexpected_exit_reported() {
            let dir = tempfile::tempdir().expect("Failed to create temp dir");
            let controller = RelayController::new(ProxyClient::new(dir.path().join("relay.sock")));
            let mut rx = controller.subscribe();

            // `true` ignores its arguments and exits at once
            controller
                .launch(&RelayLaunch { program: PathBuf::from("true"), ..launch() })
                .expect("Failed to launch relay");

            let started = rx.recv().await.expect("Failed to receive start");
            assert!(started.running);

            let stopped = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("Relay exit not reported")
                .expect("Failed to receive exit");
            assert!(!stopped.running);
            assert!(!controller.status().running);
        }

        #[tokio::test]
        async fn test_shutdown_without_relay() {
            let dir = tempfile::tempdir().expect("Failed to create temp dir");
            let controller = RelayController::new(ProxyClient::new(dir.path().join("relay.sock")));
            controller.shutdown().await;
            assert!(!controller.status().running);
        }

        #[test]
        fn test_missing_program_fails_to_launch() {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("Failed to build runtime");
            let _guard = runtime.enter();

            let controller = RelayController::new(ProxyClient::new("/nonexistent/relay.sock"));
            let result = controller.launch(&RelayLaunch {
                program: PathBuf::from("/nonexistent/headswitch-relay"),
                ..launch()
            });
            assert_matches!(result, Err(IpcError::Io(_)));
            assert!(!controller.status().running);
        }
    }
}
