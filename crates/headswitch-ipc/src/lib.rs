//! Headswitch IPC - control channel to the external audio relay.
//!
//! The relay is a separate process that captures from a virtual device and
//! renders to a real one. This crate speaks its request/reply protocol (one
//! JSON command per connection) and manages the relay process's lifetime.

pub mod client;
pub mod controller;
pub mod error;
pub mod messages;
pub mod transport;

pub use client::ProxyClient;
pub use controller::{RelayController, RelayLaunch};
pub use error::{IpcError, IpcResult};
pub use messages::{ProxyCommand, ProxyResponse, ProxyStatus};

use std::path::PathBuf;

/// Named pipe the relay listens on.
pub const PIPE_NAME: &str = r"\\.\pipe\GAutoSwitchAudioProxy";

/// Get the default relay endpoint.
///
/// On Windows this is the relay's named pipe. Elsewhere it is
/// `$XDG_RUNTIME_DIR/headswitch/relay.sock`, falling back to
/// `/run/user/$UID/headswitch/relay.sock`.
#[must_use]
#[allow(unsafe_code)] // libc::getuid() is safe to call
pub fn endpoint_path() -> PathBuf {
    #[cfg(windows)]
    {
        PathBuf::from(PIPE_NAME)
    }

    #[cfg(unix)]
    {
        if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            PathBuf::from(runtime_dir).join("headswitch/relay.sock")
        } else {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/run/user/{uid}/headswitch/relay.sock"))
        }
    }
}
