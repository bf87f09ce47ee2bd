//! MMDevice endpoint and session enumeration.

use headswitch_core::{DataFlow, Endpoint};
use tracing::trace;
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Foundation::CloseHandle;
use windows::Win32::Media::Audio::{
    AudioSessionStateActive, DEVICE_STATE_ACTIVE, IAudioSessionControl2, IAudioSessionManager2, IMMDevice,
    IMMDeviceCollection, IMMDeviceEnumerator, MMDeviceEnumerator, eConsole,
};
use windows::Win32::System::Com::{CLSCTX_ALL, CoCreateInstance, CoTaskMemFree, STGM_READ};
use windows::Win32::System::Threading::{
    OpenProcess, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION, QueryFullProcessImageNameW,
};
use windows::core::{Interface, PWSTR};

use super::{data_flow, ensure_com, platform_error};
use crate::catalog::EndpointSource;
use crate::error::AudioResult;
use crate::provider::SessionSource;

fn enumerator() -> AudioResult<IMMDeviceEnumerator> {
    ensure_com();
    unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
        .map_err(|e| platform_error("CoCreateInstance(MMDeviceEnumerator)", &e))
}

fn active_endpoints(enumerator: &IMMDeviceEnumerator, flow: DataFlow) -> AudioResult<Vec<IMMDevice>> {
    let collection: IMMDeviceCollection = unsafe { enumerator.EnumAudioEndpoints(data_flow(flow), DEVICE_STATE_ACTIVE) }
        .map_err(|e| platform_error("EnumAudioEndpoints", &e))?;
    let count = unsafe { collection.GetCount() }.map_err(|e| platform_error("GetCount", &e))?;

    Ok((0..count).filter_map(|i| unsafe { collection.Item(i) }.ok()).collect())
}

fn device_id(device: &IMMDevice) -> Option<String> {
    unsafe {
        let raw = device.GetId().ok()?;
        let id = raw.to_string().ok();
        CoTaskMemFree(Some(raw.0.cast_const().cast()));
        id
    }
}

fn friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ).ok()?;
        let value = store.GetValue(&PKEY_Device_FriendlyName).ok()?;
        Some(value.to_string()).filter(|name| !name.is_empty())
    }
}

/// Active endpoints from the MMDevice enumerator.
pub(crate) struct MmEndpointSource;

impl EndpointSource for MmEndpointSource {
    fn scan(&self, flow: DataFlow) -> AudioResult<Vec<Endpoint>> {
        let enumerator = enumerator()?;
        let default_id = unsafe { enumerator.GetDefaultAudioEndpoint(data_flow(flow), eConsole) }
            .ok()
            .and_then(|device| device_id(&device));

        let endpoints = active_endpoints(&enumerator, flow)?
            .iter()
            .filter_map(|device| {
                let id = device_id(device)?;
                let name = friendly_name(device).unwrap_or_else(|| id.clone());
                let is_default = default_id.as_deref() == Some(id.as_str());
                Some(Endpoint { id, name, flow, is_default })
            })
            .collect();

        Ok(endpoints)
    }
}

/// Active audio sessions from every active endpoint's session manager.
pub(crate) struct MmSessionSource;

impl SessionSource for MmSessionSource {
    fn active_session_pids(&self, flow: DataFlow) -> AudioResult<Vec<u32>> {
        let enumerator = enumerator()?;
        let mut pids = Vec::new();

        for device in active_endpoints(&enumerator, flow)? {
            let manager: IAudioSessionManager2 = match unsafe { device.Activate(CLSCTX_ALL, None) } {
                Ok(manager) => manager,
                Err(e) => {
                    trace!(error = %platform_error("Activate(IAudioSessionManager2)", &e), "Skipping endpoint");
                    continue;
                }
            };

            let Ok(sessions) = (unsafe { manager.GetSessionEnumerator() }) else {
                continue;
            };
            let count = unsafe { sessions.GetCount() }.unwrap_or(0);

            for index in 0..count {
                let Ok(control) = (unsafe { sessions.GetSession(index) }) else {
                    continue;
                };
                let Ok(control) = control.cast::<IAudioSessionControl2>() else {
                    continue;
                };
                if unsafe { control.GetState() }.ok() != Some(AudioSessionStateActive) {
                    continue;
                }
                if let Ok(pid) = unsafe { control.GetProcessId() } {
                    pids.push(pid);
                }
            }
        }

        Ok(pids)
    }
}

/// Full image path of a running process.
pub(crate) fn process_image_name(pid: u32) -> Option<String> {
    let mut buf = [0u16; 1024];
    let mut len = u32::try_from(buf.len()).unwrap_or(u32::MAX);

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid).ok()?;
        let result = QueryFullProcessImageNameW(handle, PROCESS_NAME_WIN32, PWSTR(buf.as_mut_ptr()), &mut len);
        let _ = CloseHandle(handle);
        result.ok()?;
    }

    let len = usize::try_from(len).ok()?;
    Some(String::from_utf16_lossy(&buf[..len]))
}
