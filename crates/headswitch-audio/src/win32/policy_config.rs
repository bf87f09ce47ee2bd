//! Undocumented policy configuration interfaces.
//!
//! `IPolicyConfig` (Windows 7 onwards) and `IPolicyConfigVista` set the
//! system default endpoint per role. `IAudioPolicyConfigFactory`, obtained
//! from the `Windows.Media.Internal.AudioPolicyConfig` activation factory,
//! persists a default endpoint per process. Only the slots that are called
//! carry real signatures; the rest exist to keep the vtable layout.

use std::ffi::c_void;

use headswitch_core::{DataFlow, DeviceRole};
use tracing::debug;
use windows::Win32::Media::Audio::{EDataFlow, ERole};
use windows::Win32::System::Com::{CLSCTX_ALL, CoCreateInstance};
use windows::Win32::System::WinRT::RoGetActivationFactory;
use windows::core::{GUID, HRESULT, HSTRING, IUnknown, IUnknown_Vtbl, Interface, PCWSTR};
use windows_core::interface;

use super::{data_flow, ensure_com, platform_error, role};
use crate::error::{AudioError, AudioResult};
use crate::provider::PolicyBackend;

const CLSID_POLICY_CONFIG_CLIENT: GUID = GUID::from_u128(0x870af99c_171d_4f9e_af0d_e63df40c2bc9);
const CLSID_POLICY_CONFIG_VISTA_CLIENT: GUID = GUID::from_u128(0x294935ce_f637_4e7c_a41b_ab255460b862);

const AUDIO_POLICY_CONFIG_CLASS: &str = "Windows.Media.Internal.AudioPolicyConfig";

/// `IAudioPolicyConfigFactory` on 21H2 and later.
const IID_AUDIO_POLICY_CONFIG_21H2: GUID = GUID::from_u128(0xab3d4648_e242_459f_b02f_541c70306324);
/// `IAudioPolicyConfigFactory` before 21H2.
const IID_AUDIO_POLICY_CONFIG_LEGACY: GUID = GUID::from_u128(0x2a59116d_6c4f_45e0_a74f_707e3fef9258);

#[interface("f8679f50-850a-41cf-9c72-430f290290c8")]
unsafe trait IPolicyConfig: IUnknown {
    fn GetMixFormat(&self, device: PCWSTR, format: *mut *mut c_void) -> HRESULT;
    fn GetDeviceFormat(&self, device: PCWSTR, default: i32, format: *mut *mut c_void) -> HRESULT;
    fn ResetDeviceFormat(&self, device: PCWSTR) -> HRESULT;
    fn SetDeviceFormat(&self, device: PCWSTR, endpoint: *mut c_void, mix: *mut c_void) -> HRESULT;
    fn GetProcessingPeriod(&self, device: PCWSTR, default: i32, period: *mut i64, min: *mut i64) -> HRESULT;
    fn SetProcessingPeriod(&self, device: PCWSTR, period: *mut i64) -> HRESULT;
    fn GetShareMode(&self, device: PCWSTR, mode: *mut c_void) -> HRESULT;
    fn SetShareMode(&self, device: PCWSTR, mode: *mut c_void) -> HRESULT;
    fn GetPropertyValue(&self, device: PCWSTR, key: *const c_void, value: *mut c_void) -> HRESULT;
    fn SetPropertyValue(&self, device: PCWSTR, key: *const c_void, value: *mut c_void) -> HRESULT;
    fn SetDefaultEndpoint(&self, device: PCWSTR, role: ERole) -> HRESULT;
    fn SetEndpointVisibility(&self, device: PCWSTR, visible: i32) -> HRESULT;
}

#[interface("568b9108-44bf-40b4-9006-86afe5b5a620")]
unsafe trait IPolicyConfigVista: IUnknown {
    fn GetMixFormat(&self, device: PCWSTR, format: *mut *mut c_void) -> HRESULT;
    fn GetDeviceFormat(&self, device: PCWSTR, default: i32, format: *mut *mut c_void) -> HRESULT;
    fn SetDeviceFormat(&self, device: PCWSTR, endpoint: *mut c_void, mix: *mut c_void) -> HRESULT;
    fn GetProcessingPeriod(&self, device: PCWSTR, default: i32, period: *mut i64, min: *mut i64) -> HRESULT;
    fn SetProcessingPeriod(&self, device: PCWSTR, period: *mut i64) -> HRESULT;
    fn GetShareMode(&self, device: PCWSTR, mode: *mut c_void) -> HRESULT;
    fn SetShareMode(&self, device: PCWSTR, mode: *mut c_void) -> HRESULT;
    fn GetPropertyValue(&self, device: PCWSTR, key: *const c_void, value: *mut c_void) -> HRESULT;
    fn SetPropertyValue(&self, device: PCWSTR, key: *const c_void, value: *mut c_void) -> HRESULT;
    fn SetDefaultEndpoint(&self, device: PCWSTR, role: ERole) -> HRESULT;
    fn SetEndpointVisibility(&self, device: PCWSTR, visible: i32) -> HRESULT;
}

/// Declared on `IUnknown`; the three `IInspectable` slots follow as
/// placeholders. Both interface ids share this layout.
#[interface("ab3d4648-e242-459f-b02f-541c70306324")]
unsafe trait IAudioPolicyConfigFactory: IUnknown {
    fn GetIids(&self) -> HRESULT;
    fn GetRuntimeClassName(&self) -> HRESULT;
    fn GetTrustLevel(&self) -> HRESULT;
    fn add_CtxVolumeChange(&self) -> HRESULT;
    fn remove_CtxVolumeChanged(&self) -> HRESULT;
    fn add_RingerVibrateStateChanged(&self) -> HRESULT;
    fn remove_RingerVibrateStateChange(&self) -> HRESULT;
    fn SetVolumeGroupGainForId(&self) -> HRESULT;
    fn GetVolumeGroupGainForId(&self) -> HRESULT;
    fn GetActiveVolumeGroupForEndpointId(&self) -> HRESULT;
    fn GetVolumeGroupsForEndpoint(&self) -> HRESULT;
    fn GetCurrentVolumeContext(&self) -> HRESULT;
    fn SetVolumeGroupMuteForId(&self) -> HRESULT;
    fn GetVolumeGroupMuteForId(&self) -> HRESULT;
    fn SetRingerVibrateState(&self) -> HRESULT;
    fn GetRingerVibrateState(&self) -> HRESULT;
    fn SetPreferredChatApplication(&self) -> HRESULT;
    fn ResetPreferredChatApplication(&self) -> HRESULT;
    fn GetPreferredChatApplication(&self) -> HRESULT;
    fn GetCurrentChatApplications(&self) -> HRESULT;
    fn add_ChatContextChanged(&self) -> HRESULT;
    fn remove_ChatContextChanged(&self) -> HRESULT;
    fn SetPersistedDefaultAudioEndpoint(
        &self,
        process_id: u32,
        flow: EDataFlow,
        role: ERole,
        device_id: *mut c_void,
    ) -> HRESULT;
    fn GetPersistedDefaultAudioEndpoint(
        &self,
        process_id: u32,
        flow: EDataFlow,
        role: ERole,
        device_id: *mut *mut c_void,
    ) -> HRESULT;
    fn ClearAllPersistedApplicationDefaultEndpoints(&self) -> HRESULT;
}

/// Which policy configuration class sets system defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Shape {
    PolicyConfig,
    PolicyConfigVista,
}

/// Policy configuration backend.
///
/// COM objects are created per call so the backend holds no apartment-bound
/// pointers and can be shared across threads.
pub(super) struct PolicyConfigBackend {
    shape: Shape,
    /// Interface id of the per-process factory, when available
    factory_iid: Option<GUID>,
}

impl PolicyConfigBackend {
    /// Check the interfaces exist on this system.
    pub(super) fn activate(shape: Shape, per_process: bool) -> AudioResult<Self> {
        ensure_com();

        match shape {
            Shape::PolicyConfig => drop(create::<IPolicyConfig>(&CLSID_POLICY_CONFIG_CLIENT)?),
            Shape::PolicyConfigVista => drop(create::<IPolicyConfigVista>(&CLSID_POLICY_CONFIG_VISTA_CLIENT)?),
        }

        let factory_iid = if per_process {
            let iid = [IID_AUDIO_POLICY_CONFIG_21H2, IID_AUDIO_POLICY_CONFIG_LEGACY]
                .into_iter()
                .find(|iid| factory(iid).is_ok())
                .ok_or(AudioError::NoPerProcess("AudioPolicyConfig"))?;
            debug!(iid = ?iid, "Per-process audio policy factory available");
            Some(iid)
        } else {
            None
        };

        Ok(Self { shape, factory_iid })
    }
}

impl PolicyBackend for PolicyConfigBackend {
    fn name(&self) -> &'static str {
        match (self.shape, self.factory_iid.is_some()) {
            (Shape::PolicyConfig, true) => "policy-config+audio-policy-config",
            (Shape::PolicyConfig, false) => "policy-config",
            (Shape::PolicyConfigVista, _) => "policy-config-vista",
        }
    }

    fn set_default(&self, routing_id: &str, device_role: DeviceRole) -> AudioResult<()> {
        ensure_com();
        let id = HSTRING::from(routing_id);
        let device = PCWSTR(id.as_ptr());

        let hr = match self.shape {
            Shape::PolicyConfig => {
                let policy = create::<IPolicyConfig>(&CLSID_POLICY_CONFIG_CLIENT)?;
                unsafe { policy.SetDefaultEndpoint(device, role(device_role)) }
            }
            Shape::PolicyConfigVista => {
                let policy = create::<IPolicyConfigVista>(&CLSID_POLICY_CONFIG_VISTA_CLIENT)?;
                unsafe { policy.SetDefaultEndpoint(device, role(device_role)) }
            }
        };

        hr.ok().map_err(|e| platform_error("SetDefaultEndpoint", &e))
    }

    fn supports_per_process(&self) -> bool {
        self.factory_iid.is_some()
    }

    fn set_process_default(
        &self,
        pid: u32,
        flow: DataFlow,
        device_role: DeviceRole,
        device_path: &str,
    ) -> AudioResult<()> {
        let iid = self.factory_iid.ok_or(AudioError::NoPerProcess(self.name()))?;
        ensure_com();

        let factory = factory(&iid)?;
        let path = HSTRING::from(device_path);
        // The slot takes the HSTRING handle by value
        let handle: *mut c_void = unsafe { std::mem::transmute_copy(&path) };

        unsafe { factory.SetPersistedDefaultAudioEndpoint(pid, data_flow(flow), role(device_role), handle) }
            .ok()
            .map_err(|e| platform_error("SetPersistedDefaultAudioEndpoint", &e))
    }
}

fn create<T: Interface>(clsid: &GUID) -> AudioResult<T> {
    unsafe { CoCreateInstance(clsid, None, CLSCTX_ALL) }.map_err(|e| platform_error("CoCreateInstance", &e))
}

/// The per-process factory, queried for `iid` and viewed through the shared
/// vtable declaration.
fn factory(iid: &GUID) -> AudioResult<IAudioPolicyConfigFactory> {
    let class = HSTRING::from(AUDIO_POLICY_CONFIG_CLASS);
    let unknown: IUnknown =
        unsafe { RoGetActivationFactory(&class) }.map_err(|e| platform_error("RoGetActivationFactory", &e))?;

    let mut raw = std::ptr::null_mut();
    unsafe { unknown.query(iid, &mut raw) }
        .ok()
        .map_err(|e| platform_error("QueryInterface", &e))?;

    Ok(unsafe { IAudioPolicyConfigFactory::from_raw(raw) })
}
