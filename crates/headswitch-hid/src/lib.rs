//! Headswitch HID - wireless receiver link-state probing.
//!
//! The receiver of a wireless headset stays enumerated whether or not the
//! headset is powered, so presence alone says nothing. This crate talks to
//! the receiver's vendor-specific interface, asks it for the headset's
//! connectivity, and turns the answer into a [`LinkState`].
//!
//! [`LinkState`]: headswitch_core::LinkState

pub mod backend;
pub mod descriptor;
pub mod error;
pub mod monitor;
pub mod probe;
pub mod protocol;

pub use backend::{HidApiBackend, HidBackend, HidLink, InterfaceInfo};
pub use descriptor::ReportCapabilities;
pub use error::{HidError, HidResult};
pub use monitor::HeadsetMonitor;
pub use probe::{LinkProbe, LinkStateProbe, ReceiverProfile};
