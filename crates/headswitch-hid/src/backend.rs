//! Access to HID interfaces, behind a seam so the probe can be driven by a
//! scripted device in tests.

use std::ffi::CString;
use std::time::Duration;

use hidapi::{HidApi, HidDevice};
use tracing::trace;

use crate::error::{HidError, HidResult};

/// Largest report descriptor the HID class allows.
const MAX_REPORT_DESCRIPTOR: usize = 4096;

/// One enumerated HID interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// Platform device path, stable while the interface stays attached
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Usage page reported at enumeration, `0` when the platform does not know
    pub usage_page: u16,
    pub usage: u16,
    pub interface_number: i32,
    pub product: Option<String>,
}

/// Enumerates and opens HID interfaces.
pub trait HidBackend: Send {
    type Link: HidLink;

    /// All interfaces with the given vendor id and, when non-zero, product id.
    ///
    /// # Errors
    /// Returns an error if the platform enumeration fails.
    fn enumerate(&mut self, vendor_id: u16, product_id: u16) -> HidResult<Vec<InterfaceInfo>>;

    /// Open an interface for reading and writing.
    ///
    /// # Errors
    /// Returns an error if the interface cannot be opened.
    fn open(&mut self, interface: &InterfaceInfo) -> HidResult<Self::Link>;
}

/// An open read/write handle on one interface.
pub trait HidLink: Send {
    /// The interface's report descriptor.
    ///
    /// # Errors
    /// Returns an error if the platform cannot supply it.
    fn report_descriptor(&self) -> HidResult<Vec<u8>>;

    /// Write one output report, report id first.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    fn write(&self, report: &[u8]) -> HidResult<usize>;

    /// Read one input report, waiting at most `timeout`. Returns `0` on timeout.
    ///
    /// # Errors
    /// Returns an error if the read fails.
    fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> HidResult<usize>;
}

/// [`HidBackend`] over the `hidapi` crate.
pub struct HidApiBackend {
    api: HidApi,
}

impl HidApiBackend {
    /// Initialize the platform HID library.
    ///
    /// # Errors
    /// Returns an error if the library cannot be initialized.
    pub fn new() -> HidResult<Self> {
        Ok(Self { api: HidApi::new()? })
    }
}

impl HidBackend for HidApiBackend {
    type Link = HidApiLink;

    fn enumerate(&mut self, vendor_id: u16, product_id: u16) -> HidResult<Vec<InterfaceInfo>> {
        self.api.refresh_devices()?;

        let interfaces: Vec<_> = self
            .api
            .device_list()
            .filter(|d| d.vendor_id() == vendor_id && (product_id == 0 || d.product_id() == product_id))
            .map(|d| InterfaceInfo {
                path: d.path().to_string_lossy().into_owned(),
                vendor_id: d.vendor_id(),
                product_id: d.product_id(),
                usage_page: d.usage_page(),
                usage: d.usage(),
                interface_number: d.interface_number(),
                product: d.product_string().map(String::from),
            })
            .collect();

        trace!(count = interfaces.len(), "Enumerated receiver interfaces");
        Ok(interfaces)
    }

    fn open(&mut self, interface: &InterfaceInfo) -> HidResult<HidApiLink> {
        let path = CString::new(interface.path.as_str())
            .map_err(|e| HidError::Api(format!("invalid device path: {e}")))?;
        let device = self.api.open_path(&path)?;
        Ok(HidApiLink { device })
    }
}

/// Open `hidapi` device handle.
pub struct HidApiLink {
    device: HidDevice,
}

impl HidLink for HidApiLink {
    fn report_descriptor(&self) -> HidResult<Vec<u8>> {
        let mut buf = vec![0u8; MAX_REPORT_DESCRIPTOR];
        let len = self.device.get_report_descriptor(&mut buf)?;
        buf.truncate(len);
        Ok(buf)
    }

    fn write(&self, report: &[u8]) -> HidResult<usize> {
        Ok(self.device.write(report)?)
    }

    fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> HidResult<usize> {
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        Ok(self.device.read_timeout(buf, millis)?)
    }
}
