//! One-shot request/reply exchange with the relay.
//!
//! Each command opens a fresh connection, writes one JSON request, reads one
//! JSON reply and closes. The relay disconnects after replying.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::trace;

use crate::error::{IpcError, IpcResult};
use crate::messages::{ProxyCommand, ProxyResponse};

/// Upper bound on establishing a connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on writing the request and reading the reply.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest message either side sends.
pub const MAX_MESSAGE: usize = 4096;

/// Send one command to the relay at `endpoint` and read its reply.
///
/// # Errors
/// Returns an error if the relay cannot be reached within
/// [`CONNECT_TIMEOUT`], does not reply within [`EXCHANGE_TIMEOUT`], or
/// replies with something that is not a response.
pub async fn exchange(endpoint: &Path, command: &ProxyCommand) -> IpcResult<ProxyResponse> {
    let request = serde_json::to_vec(command)?;
    let stream = connect(endpoint).await?;
    trace!(command = command.name(), bytes = request.len(), "Sending relay command");

    timeout(EXCHANGE_TIMEOUT, round_trip(stream, &request))
        .await
        .map_err(|_| IpcError::Timeout)?
}

/// Write `request` and read until a complete response has arrived.
async fn round_trip<S>(mut stream: S, request: &[u8]) -> IpcResult<ProxyResponse>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request).await?;
    stream.flush().await?;

    let mut reply = Vec::with_capacity(256);
    let mut chunk = [0u8; 512];
    loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            if reply.is_empty() {
                return Err(IpcError::NoResponse);
            }
            return Ok(serde_json::from_slice(&reply)?);
        }

        reply.extend_from_slice(&chunk[..read]);
        if reply.len() > MAX_MESSAGE {
            return Err(IpcError::MessageTooLarge(MAX_MESSAGE));
        }

        match serde_json::from_slice(&reply) {
            Ok(response) => return Ok(response),
            Err(e) if e.is_eof() => {}
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(unix)]
async fn connect(endpoint: &Path) -> IpcResult<tokio::net::UnixStream> {
    match timeout(CONNECT_TIMEOUT, tokio::net::UnixStream::connect(endpoint)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(IpcError::Unreachable(format!("{}: {e}", endpoint.display()))),
        Err(_) => Err(IpcError::Timeout),
    }
}

#[cfg(windows)]
async fn connect(endpoint: &Path) -> IpcResult<tokio::net::windows::named_pipe::NamedPipeClient> {
    use tokio::net::windows::named_pipe::{ClientOptions, PipeMode};

    /// All pipe instances are busy.
    const ERROR_PIPE_BUSY: i32 = 231;

    let deadline = tokio::time::Instant::now() + CONNECT_TIMEOUT;
    loop {
        match ClientOptions::new().pipe_mode(PipeMode::Message).open(endpoint) {
            Ok(client) => return Ok(client),
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(IpcError::Timeout);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => return Err(IpcError::Unreachable(format!("{}: {e}", endpoint.display()))),
        }
    }
}
