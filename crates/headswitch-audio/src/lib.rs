//! Headswitch audio - default endpoint routing and session migration.
//!
//! The [`EndpointRouter`] changes the OS default endpoint for every role and
//! moves processes with active sessions onto it. It works through whichever
//! routing facility the running OS exposes, chosen from an ordered list of
//! candidates; when none activates the router reports itself unsupported and
//! every call is a logged no-op.

pub mod catalog;
pub mod error;
pub mod process;
pub mod provider;
pub mod router;

#[cfg(windows)]
#[allow(unsafe_code)]
mod win32;

pub use catalog::{DeviceCatalog, EndpointSource, platform_source};
pub use error::{AudioError, AudioResult};
pub use process::SystemProcessTable;
pub use provider::{Candidate, PolicyBackend, SessionSource, platform_candidates, platform_sessions};
pub use router::EndpointRouter;
