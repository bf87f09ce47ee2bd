//! Relay control client.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{IpcError, IpcResult};
use crate::messages::{ProxyCommand, ProxyResponse};
use crate::transport;

/// Sends control commands to a running relay.
///
/// Holds no connection; every command is a separate exchange. Failed
/// commands are not retried.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    endpoint: PathBuf,
}

impl ProxyClient {
    /// Client for the relay listening at `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<PathBuf>) -> Self {
        Self { endpoint: endpoint.into() }
    }

    /// Client for the relay at the default endpoint.
    #[must_use]
    pub fn at_default_endpoint() -> Self {
        Self::new(crate::endpoint_path())
    }

    /// Endpoint this client connects to.
    #[must_use]
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Send a command, translating device ids to the routing namespace.
    ///
    /// # Errors
    /// Returns an error if the relay is unreachable, does not reply, or
    /// replies with `success = false`.
    pub async fn send(&self, command: ProxyCommand) -> IpcResult<ProxyResponse> {
        let command = command.into_routing();
        let name = command.name();

        let response = match transport::exchange(&self.endpoint, &command).await {
            Ok(response) => response,
            Err(e) => {
                warn!(command = name, error = %e, "Relay command failed");
                return Err(e);
            }
        };

        if !response.success {
            let message = response.message.unwrap_or_else(|| format!("{name} failed"));
            warn!(command = name, message = %message, "Relay rejected command");
            return Err(IpcError::Rejected(message));
        }

        debug!(command = name, message = ?response.message, "Relay command succeeded");
        Ok(response)
    }

    /// Switch the relay's speaker output.
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub async fn set_output(&self, device_id: &str) -> IpcResult<ProxyResponse> {
        self.send(ProxyCommand::SetOutput { device_id: device_id.to_string() }).await
    }

    /// Switch the relay's microphone input.
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub async fn set_mic_input(&self, device_id: &str) -> IpcResult<ProxyResponse> {
        self.send(ProxyCommand::SetMicInput { device_id: device_id.to_string() }).await
    }

    /// Enable or disable the relay's microphone path.
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub async fn enable_mic(&self, enabled: bool) -> IpcResult<ProxyResponse> {
        self.send(ProxyCommand::EnableMic { enabled }).await
    }

    /// Query the relay's configuration.
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub async fn get_status(&self) -> IpcResult<ProxyResponse> {
        self.send(ProxyCommand::GetStatus).await
    }

    /// Ask the relay to shut down.
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub async fn stop(&self) -> IpcResult<ProxyResponse> {
        self.send(ProxyCommand::Stop).await
    }
}
