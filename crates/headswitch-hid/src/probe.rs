//! Link-state probe.
//!
//! Each probe enumerates the receiver, reuses the cached handle while its
//! path is still present, sends the connectivity query and parses the reply.
//! Failures never escape: they resolve to `Unknown` (or `DongleAbsent` when
//! nothing is enumerated) and are logged.

use std::time::Duration;

use headswitch_core::{Error as CoreError, LinkState};
use tracing::{debug, info, warn};

use crate::backend::{HidBackend, HidLink, InterfaceInfo};
use crate::descriptor;
use crate::error::{HidError, HidResult};
use crate::protocol;

/// Identity and framing of the receiver to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverProfile {
    pub vendor_id: u16,
    /// `0` matches any product from the vendor
    pub product_id: u16,
    /// Usage page of the vendor control interface
    pub usage_page: u16,
    /// Output report length used when the descriptor is unavailable
    pub report_length: usize,
    pub read_timeout: Duration,
}

impl Default for ReceiverProfile {
    fn default() -> Self {
        Self {
            vendor_id: protocol::LOGITECH_VID,
            product_id: protocol::RECEIVER_PID,
            usage_page: protocol::VENDOR_USAGE_PAGE,
            report_length: protocol::DEFAULT_REPORT_LENGTH,
            read_timeout: Duration::from_millis(200),
        }
    }
}

/// Something that can be asked for the current link state.
pub trait LinkProbe: Send {
    /// Probe the receiver once.
    fn probe(&mut self) -> LinkState;
}

struct OpenInterface<L> {
    path: String,
    report_length: usize,
    link: L,
}

/// Probes a receiver through a [`HidBackend`].
pub struct LinkStateProbe<B: HidBackend> {
    backend: B,
    profile: ReceiverProfile,
    open: Option<OpenInterface<B::Link>>,
}

impl<B: HidBackend> LinkStateProbe<B> {
    /// Create a probe. No device is touched until the first probe.
    #[must_use]
    pub fn new(backend: B, profile: ReceiverProfile) -> Self {
        Self { backend, profile, open: None }
    }

    /// The receiver profile in use.
    #[must_use]
    pub fn profile(&self) -> &ReceiverProfile {
        &self.profile
    }

    /// Path of the cached interface, if one is open.
    #[must_use]
    pub fn open_path(&self) -> Option<&str> {
        self.open.as_ref().map(|o| o.path.as_str())
    }

    /// Drop the cached handle so the next probe reopens.
    pub fn invalidate(&mut self) {
        if let Some(open) = self.open.take() {
            debug!(path = %open.path, "Invalidated receiver handle");
        }
    }

    /// Make sure a capable interface is open, reusing the cached one while
    /// its path is still enumerated.
    fn ensure_open(&mut self, interfaces: &[InterfaceInfo]) -> HidResult<()> {
        if let Some(open) = &self.open {
            if interfaces.iter().any(|i| i.path == open.path) {
                return Ok(());
            }
            debug!(path = %open.path, "Cached receiver path disappeared");
            self.open = None;
        }

        let mut candidates: Vec<&InterfaceInfo> = interfaces
            .iter()
            .filter(|i| i.usage_page == self.profile.usage_page || i.usage_page == 0)
            .collect();
        candidates.dedup_by(|a, b| a.path == b.path);

        for interface in candidates {
            let link = match self.backend.open(interface) {
                Ok(link) => link,
                Err(e) => {
                    debug!(path = %interface.path, error = %e, "Failed to open receiver interface");
                    continue;
                }
            };

            let Some(report_length) = self.capable_report_length(interface, &link) else {
                continue;
            };

            info!(
                path = %interface.path,
                interface = interface.interface_number,
                product = interface.product.as_deref().unwrap_or("unknown"),
                report_length,
                "Opened receiver control interface"
            );
            self.open = Some(OpenInterface { path: interface.path.clone(), report_length, link });
            return Ok(());
        }

        Err(HidError::NoCapableInterface(self.profile.usage_page))
    }

    /// Output report length if the interface is the vendor control
    /// interface, judged from its report descriptor.
    fn capable_report_length(&self, interface: &InterfaceInfo, link: &B::Link) -> Option<usize> {
        match link.report_descriptor().and_then(|d| descriptor::parse(&d)) {
            Ok(caps) => {
                if caps.has_usage_page(self.profile.usage_page) && caps.output_report_length > 0 {
                    Some(caps.output_report_length)
                } else {
                    debug!(
                        path = %interface.path,
                        usage_page = ?caps.usage_page(),
                        output = caps.output_report_length,
                        "Interface is not the control interface"
                    );
                    None
                }
            }
            // Without a descriptor, trust the enumerated usage page
            Err(e) if interface.usage_page == self.profile.usage_page => {
                debug!(path = %interface.path, error = %e, "No report descriptor, assuming default framing");
                Some(self.profile.report_length)
            }
            Err(e) => {
                debug!(path = %interface.path, error = %e, "No report descriptor and no usage page");
                None
            }
        }
    }

    /// Send the query on the open interface and read one reply.
    fn query(&mut self) -> HidResult<bool> {
        let Some(open) = &self.open else {
            return Err(HidError::DeviceNotFound);
        };

        let request = protocol::build_query(open.report_length);
        if let Err(e) = open.link.write(&request) {
            self.invalidate();
            return Err(e);
        }

        let mut reply = vec![0u8; open.report_length.max(protocol::MIN_REPLY_LENGTH)];
        let len = open.link.read_timeout(&mut reply, self.profile.read_timeout)?;
        if len == 0 {
            let millis = u64::try_from(self.profile.read_timeout.as_millis()).unwrap_or(u64::MAX);
            return Err(HidError::Timeout(millis));
        }

        protocol::parse_reply(&reply[..len])
    }
}

impl<B: HidBackend> LinkProbe for LinkStateProbe<B> {
    fn probe(&mut self) -> LinkState {
        let interfaces = match self.backend.enumerate(self.profile.vendor_id, self.profile.product_id) {
            Ok(interfaces) => interfaces,
            Err(e) => {
                warn!(error = %e, "Receiver enumeration failed");
                self.invalidate();
                return LinkState::Unknown;
            }
        };

        if interfaces.is_empty() {
            if self.open.take().is_some() {
                info!("{}", CoreError::DeviceAbsent);
            }
            return LinkState::DongleAbsent;
        }

        if let Err(e) = self.ensure_open(&interfaces) {
            debug!(error = %e, "No usable receiver interface");
            return LinkState::Unknown;
        }

        match self.query() {
            Ok(true) => LinkState::Online,
            Ok(false) => LinkState::Offline,
            Err(e) => {
                debug!(error = %CoreError::CommunicationTimeout(e.to_string()), "Probe inconclusive");
                LinkState::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// Scripted replies shared between the backend and every link it opens.
    #[derive(Default)]
    struct Script {
        replies: Mutex<VecDeque<HidResult<Vec<u8>>>>,
        writes: Mutex<Vec<Vec<u8>>>,
        fail_writes: Mutex<bool>,
    }

    struct FakeBackend {
        interfaces: Arc<Mutex<Vec<InterfaceInfo>>>,
        descriptors: Vec<(String, Option<Vec<u8>>)>,
        script: Arc<Script>,
        opens: Arc<AtomicUsize>,
    }

    struct FakeLink {
        descriptor: Option<Vec<u8>>,
        script: Arc<Script>,
    }

    impl HidBackend for FakeBackend {
        type Link = FakeLink;

        fn enumerate(&mut self, _vendor_id: u16, _product_id: u16) -> HidResult<Vec<InterfaceInfo>> {
            Ok(self.interfaces.lock().clone())
        }

        fn open(&mut self, interface: &InterfaceInfo) -> HidResult<FakeLink> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let descriptor = self
                .descriptors
                .iter()
                .find(|(path, _)| *path == interface.path)
                .and_then(|(_, d)| d.clone());
            Ok(FakeLink { descriptor, script: self.script.clone() })
        }
    }

    impl HidLink for FakeLink {
        fn report_descriptor(&self) -> HidResult<Vec<u8>> {
            self.descriptor.clone().ok_or_else(|| HidError::Api("unsupported".into()))
        }

        fn write(&self, report: &[u8]) -> HidResult<usize> {
            if *self.script.fail_writes.lock() {
                return Err(HidError::Api("device disconnected".into()));
            }
            self.script.writes.lock().push(report.to_vec());
            Ok(report.len())
        }

        fn read_timeout(&self, buf: &mut [u8], _timeout: Duration) -> HidResult<usize> {
            match self.script.replies.lock().pop_front() {
                Some(Ok(reply)) => {
                    let len = reply.len().min(buf.len());
                    buf[..len].copy_from_slice(&reply[..len]);
                    Ok(len)
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    const VENDOR_DESCRIPTOR: &[u8] = &[
        0x06, 0x43, 0xff, 0x0a, 0x02, 0x02, 0xa1, 0x01, 0x85, 0x51, 0x75, 0x08, 0x95, 0x3f,
        0x09, 0x01, 0x81, 0x00, 0x09, 0x01, 0x91, 0x00, 0xc0,
    ];

    const CONSUMER_DESCRIPTOR: &[u8] =
        &[0x05, 0x0c, 0x09, 0x01, 0xa1, 0x01, 0x75, 0x10, 0x95, 0x02, 0x81, 0x00, 0xc0];

    fn interface(path: &str, usage_page: u16) -> InterfaceInfo {
        InterfaceInfo {
            path: path.into(),
            vendor_id: protocol::LOGITECH_VID,
            product_id: protocol::RECEIVER_PID,
            usage_page,
            usage: 0,
            interface_number: 3,
            product: Some("PRO X Wireless".into()),
        }
    }

    fn reply(connectivity: u8) -> HidResult<Vec<u8>> {
        let mut buf = vec![0u8; 64];
        buf[..2].copy_from_slice(&protocol::REPLY_PREFIX);
        buf[protocol::CONNECTIVITY_OFFSET] = connectivity;
        Ok(buf)
    }

    struct Fixture {
        interfaces: Arc<Mutex<Vec<InterfaceInfo>>>,
        script: Arc<Script>,
        opens: Arc<AtomicUsize>,
        probe: LinkStateProbe<FakeBackend>,
    }

    fn fixture(interfaces: Vec<InterfaceInfo>, descriptors: Vec<(&str, Option<&[u8]>)>) -> Fixture {
        let interfaces = Arc::new(Mutex::new(interfaces));
        let script = Arc::new(Script::default());
        let opens = Arc::new(AtomicUsize::new(0));
        let backend = FakeBackend {
            interfaces: interfaces.clone(),
            descriptors: descriptors
                .into_iter()
                .map(|(p, d)| (p.to_string(), d.map(<[u8]>::to_vec)))
                .collect(),
            script: script.clone(),
            opens: opens.clone(),
        };
        Fixture {
            interfaces,
            script,
            opens,
            probe: LinkStateProbe::new(backend, ReceiverProfile::default()),
        }
    }

    fn standard() -> Fixture {
        fixture(
            vec![interface("consumer", 0x000c), interface("vendor", 0xff43)],
            vec![("consumer", Some(CONSUMER_DESCRIPTOR)), ("vendor", Some(VENDOR_DESCRIPTOR))],
        )
    }

    #[test]
    fn test_no_devices_is_dongle_absent() {
        let mut f = fixture(Vec::new(), Vec::new());
        assert_eq!(f.probe.probe(), LinkState::DongleAbsent);
        assert_eq!(f.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_online_and_offline() {
        let mut f = standard();
        f.script.replies.lock().extend([reply(1), reply(0)]);

        assert_eq!(f.probe.probe(), LinkState::Online);
        assert_eq!(f.probe.probe(), LinkState::Offline);
        assert_eq!(f.probe.open_path(), Some("vendor"));

        let writes = f.script.writes.lock();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].len(), 64);
        assert_eq!(&writes[0][..10], &protocol::QUERY);
    }

    #[test]
    fn test_handle_is_cached() {
        let mut f = standard();
        f.script.replies.lock().extend([reply(1), reply(1), reply(1)]);

        for _ in 0..3 {
            assert_eq!(f.probe.probe(), LinkState::Online);
        }
        assert_eq!(f.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_path_change_reopens() {
        let mut f = standard();
        f.script.replies.lock().extend([reply(1), reply(1)]);
        assert_eq!(f.probe.probe(), LinkState::Online);

        *f.interfaces.lock() = vec![interface("vendor-replugged", 0xff43)];
        assert_eq!(f.probe.probe(), LinkState::Online);
        assert_eq!(f.probe.open_path(), Some("vendor-replugged"));
    }

    #[test]
    fn test_timeout_is_unknown() {
        let mut f = standard();
        assert_eq!(f.probe.probe(), LinkState::Unknown);
        // A silent device keeps its handle
        assert_eq!(f.probe.open_path(), Some("vendor"));
    }

    #[test]
    fn test_short_or_misprefixed_reply_is_unknown() {
        let mut f = standard();
        let mut wrong = reply(1).unwrap();
        wrong[0] = 0x11;
        f.script.replies.lock().extend([Ok(vec![0x51, 0x08, 0x00]), Ok(wrong)]);

        assert_eq!(f.probe.probe(), LinkState::Unknown);
        assert_eq!(f.probe.probe(), LinkState::Unknown);
    }

    #[test]
    fn test_write_failure_invalidates_handle() {
        let mut f = standard();
        *f.script.fail_writes.lock() = true;

        assert_eq!(f.probe.probe(), LinkState::Unknown);
        assert_eq!(f.probe.open_path(), None);

        *f.script.fail_writes.lock() = false;
        f.script.replies.lock().push_back(reply(0));
        assert_eq!(f.probe.probe(), LinkState::Offline);
        assert_eq!(f.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_no_capable_interface_is_unknown() {
        let mut f = fixture(
            vec![interface("consumer", 0x000c)],
            vec![("consumer", Some(CONSUMER_DESCRIPTOR))],
        );
        assert_eq!(f.probe.probe(), LinkState::Unknown);
        assert!(f.script.writes.lock().is_empty());
    }

    #[test]
    fn test_missing_descriptor_trusts_enumeration() {
        let mut f = fixture(vec![interface("vendor", 0xff43)], vec![("vendor", None)]);
        f.script.replies.lock().push_back(reply(1));

        assert_eq!(f.probe.probe(), LinkState::Online);
        assert_eq!(f.script.writes.lock()[0].len(), protocol::DEFAULT_REPORT_LENGTH);
    }

    #[test]
    fn test_unknown_usage_page_judged_by_descriptor() {
        let mut f = fixture(
            vec![interface("a", 0), interface("b", 0)],
            vec![("a", Some(CONSUMER_DESCRIPTOR)), ("b", Some(VENDOR_DESCRIPTOR))],
        );
        f.script.replies.lock().push_back(reply(0));

        assert_eq!(f.probe.probe(), LinkState::Offline);
        assert_eq!(f.probe.open_path(), Some("b"));
    }

    #[test]
    fn test_receiver_removed_drops_handle() {
        let mut f = standard();
        f.script.replies.lock().push_back(reply(1));
        assert_eq!(f.probe.probe(), LinkState::Online);

        f.interfaces.lock().clear();
        assert_eq!(f.probe.probe(), LinkState::DongleAbsent);
        assert_eq!(f.probe.open_path(), None);
    }
}
