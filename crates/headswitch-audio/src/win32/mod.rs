//! Windows routing facilities over COM.

mod mmdevice;
mod policy_config;

use headswitch_core::DataFlow;
use windows::Win32::Media::Audio::{EDataFlow, ERole, eCapture, eCommunications, eConsole, eMultimedia, eRender};
use windows::Win32::System::Com::{COINIT_MULTITHREADED, CoInitializeEx, CoUninitialize};

use crate::error::AudioError;
use crate::provider::{Candidate, PolicyBackend};

pub(crate) use mmdevice::{MmEndpointSource, MmSessionSource, process_image_name};
use policy_config::{PolicyConfigBackend, Shape};

/// Routing candidates, most capable first.
pub(crate) fn candidates() -> Vec<Candidate> {
    vec![
        Candidate::new("policy-config+audio-policy-config", || {
            Ok(Box::new(PolicyConfigBackend::activate(Shape::PolicyConfig, true)?) as Box<dyn PolicyBackend>)
        }),
        Candidate::new("policy-config", || {
            Ok(Box::new(PolicyConfigBackend::activate(Shape::PolicyConfig, false)?) as Box<dyn PolicyBackend>)
        }),
        Candidate::new("policy-config-vista", || {
            Ok(Box::new(PolicyConfigBackend::activate(Shape::PolicyConfigVista, false)?)
                as Box<dyn PolicyBackend>)
        }),
    ]
}

/// Per-thread multithreaded apartment, released when the thread exits.
struct Apartment {
    owned: bool,
}

impl Apartment {
    fn enter() -> Self {
        // S_FALSE (already initialized) still needs a matching uninitialize
        let owned = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }.is_ok();
        Self { owned }
    }
}

impl Drop for Apartment {
    fn drop(&mut self) {
        if self.owned {
            unsafe { CoUninitialize() };
        }
    }
}

thread_local! {
    static APARTMENT: Apartment = Apartment::enter();
}

/// Make sure COM is initialized on the calling thread.
fn ensure_com() {
    APARTMENT.with(|_| {});
}

fn platform_error(context: &'static str, error: &windows::core::Error) -> AudioError {
    AudioError::Platform { context, code: error.code().0 }
}

fn data_flow(flow: DataFlow) -> EDataFlow {
    match flow {
        DataFlow::Render => eRender,
        DataFlow::Capture => eCapture,
    }
}

fn role(role: headswitch_core::DeviceRole) -> ERole {
    match role {
        headswitch_core::DeviceRole::Console => eConsole,
        headswitch_core::DeviceRole::Multimedia => eMultimedia,
        headswitch_core::DeviceRole::Communications => eCommunications,
    }
}
