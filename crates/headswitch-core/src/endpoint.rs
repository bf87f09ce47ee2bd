//! Audio endpoints and endpoint identifier translation.
//!
//! Endpoints are reported by device enumeration with an identifier in the
//! *enumeration namespace*, typically a device-interface path such as
//! `\\?\SWD#MMDEVAPI#{0.0.0.00000000}.{b3f8fa53-...}#{e6327cad-...}`. The
//! routing facility instead expects the bare endpoint token embedded in that
//! path (`{0.0.0.00000000}.{b3f8fa53-...}`), the *routing namespace*.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Interface class of render endpoints in device-interface paths.
pub const RENDER_INTERFACE_CLASS: &str = "{e6327cad-dcec-4949-ae8a-991e976a79d2}";
/// Interface class of capture endpoints in device-interface paths.
pub const CAPTURE_INTERFACE_CLASS: &str = "{2eef81be-33fa-4800-9670-1cd474972c3f}";

const PATH_PREFIX: &str = r"\\?\SWD#MMDEVAPI#";

/// Direction of audio data through an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFlow {
    /// Playback (speakers, headphones)
    Render,
    /// Recording (microphones)
    Capture,
}

impl DataFlow {
    /// Interface class GUID used in device-interface paths for this flow.
    #[must_use]
    pub fn interface_class(self) -> &'static str {
        match self {
            Self::Render => RENDER_INTERFACE_CLASS,
            Self::Capture => CAPTURE_INTERFACE_CLASS,
        }
    }
}

impl fmt::Display for DataFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Render => "render",
            Self::Capture => "capture",
        })
    }
}

/// Role a default endpoint is assigned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    Console,
    Multimedia,
    Communications,
}

impl DeviceRole {
    /// Every role, in the order default endpoints are assigned.
    pub const ALL: [Self; 3] = [Self::Console, Self::Multimedia, Self::Communications];
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Console => "console",
            Self::Multimedia => "multimedia",
            Self::Communications => "communications",
        })
    }
}

/// An OS-level audio endpoint as reported by device enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Identifier in the enumeration namespace
    pub id: String,
    /// Display name
    pub name: String,
    /// Data flow direction
    pub flow: DataFlow,
    /// Whether this is the current default for its flow
    pub is_default: bool,
}

impl Endpoint {
    /// Identifier in the routing namespace.
    #[must_use]
    pub fn routing_id(&self) -> &str {
        routing_id(&self.id)
    }
}

/// Translate an enumeration-namespace identifier to the routing namespace.
///
/// Finds the first `{` immediately followed by a digit and returns the text
/// from there up to the next path separator (`#`, `\` or `/`) or the end.
/// Identifiers without such a token are returned unchanged, so translating
/// an id that is already in the routing namespace is a no-op.
#[must_use]
pub fn routing_id(id: &str) -> &str {
    let bytes = id.as_bytes();
    let Some(start) = bytes.windows(2).position(|w| w[0] == b'{' && w[1].is_ascii_digit()) else {
        return id;
    };

    let token = &id[start..];
    let end = token.find(|c| matches!(c, '#' | '\\' | '/')).unwrap_or(token.len());
    &token[..end]
}

/// Build the device-interface path the per-process routing facility expects.
///
/// Inverse of [`routing_id`]: `routing_id(&persisted_endpoint_path(id, flow))`
/// yields `routing_id(id)` again.
#[must_use]
pub fn persisted_endpoint_path(id: &str, flow: DataFlow) -> String {
    format!("{PATH_PREFIX}{}#{}", routing_id(id), flow.interface_class())
}

/// Whether two identifiers, in either namespace, name the same endpoint.
#[must_use]
pub fn same_endpoint(a: &str, b: &str) -> bool {
    routing_id(a).eq_ignore_ascii_case(routing_id(b))
}
