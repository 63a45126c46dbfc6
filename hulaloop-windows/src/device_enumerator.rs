//! Windows audio device enumeration via the MMDevice API.
//!
//! Capture endpoints are offered for recording. Render endpoints are
//! offered for both loopback capture and playback.

use windows::core::BSTR;
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use hulaloop_core::models::device::{Device, DeviceCapabilities};
use hulaloop_core::models::error::TransportError;
use hulaloop_core::traits::device_source::DeviceSource;

use crate::com::{self, MixFormatPtr};
use crate::error::WasapiError;

/// [`DeviceSource`] listing active WASAPI endpoints.
///
/// Every call creates a fresh `IMMDeviceEnumerator`, so hot-plugged devices
/// show up on the next enumeration.
#[derive(Debug, Clone, Copy, Default)]
pub struct WasapiDeviceSource;

impl WasapiDeviceSource {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceSource for WasapiDeviceSource {
    fn enumerate(&self) -> Result<Vec<Device>, TransportError> {
        let devices = com::run_in_mta(|| unsafe {
            let enumerator = com::create_enumerator()?;
            let mut devices = list_endpoints(&enumerator, eCapture, DeviceCapabilities::RECORD)?;
            devices.extend(list_endpoints(
                &enumerator,
                eRender,
                DeviceCapabilities::LOOPBACK | DeviceCapabilities::OUTPUT,
            )?);
            Ok(devices)
        })?;
        log::debug!("Enumerated {} WASAPI endpoints", devices.len());
        Ok(devices)
    }
}

unsafe fn list_endpoints(
    enumerator: &IMMDeviceEnumerator,
    data_flow: EDataFlow,
    capabilities: DeviceCapabilities,
) -> Result<Vec<Device>, WasapiError> {
    let collection = enumerator
        .EnumAudioEndpoints(data_flow, DEVICE_STATE_ACTIVE)
        .map_err(|e| WasapiError::Com(format!("EnumAudioEndpoints failed: {}", e)))?;
    let count = collection
        .GetCount()
        .map_err(|e| WasapiError::Com(format!("GetCount failed: {}", e)))?;

    let default_id = enumerator
        .GetDefaultAudioEndpoint(data_flow, eConsole)
        .ok()
        .and_then(|d| d.GetId().ok())
        .and_then(|id| id.to_string().ok());

    let mut devices = Vec::new();
    for i in 0..count {
        let Ok(endpoint) = collection.Item(i) else {
            continue;
        };
        let Some(id) = endpoint.GetId().ok().and_then(|id| id.to_string().ok()) else {
            continue;
        };
        let name = friendly_name(&endpoint).unwrap_or_else(|| format!("Audio Device {}", i));

        let mut device = Device::new(id.clone(), name, capabilities);
        match endpoint
            .Activate::<IAudioClient>(CLSCTX_ALL, None)
            .map_err(|e| WasapiError::Com(e.to_string()))
            .and_then(|client| MixFormatPtr::of(&client))
        {
            Ok(mix) => {
                let mix = mix.describe();
                device = device
                    .with_sample_rates(mix.sample_rate..=mix.sample_rate)
                    .with_channels(mix.channels);
            }
            Err(e) => log::debug!("No mix format for {}: {}", device.name, e),
        }
        if default_id.as_deref() == Some(id.as_str()) {
            device = device.as_default();
        }
        devices.push(device);
    }
    Ok(devices)
}

/// Read `PKEY_Device_FriendlyName` from the endpoint's property store.
unsafe fn friendly_name(endpoint: &IMMDevice) -> Option<String> {
    let store = endpoint.OpenPropertyStore(STGM_READ).ok()?;
    let value = store.GetValue(&PKEY_Device_FriendlyName).ok()?;
    let name = BSTR::try_from(&value).ok()?.to_string();
    (!name.is_empty()).then_some(name)
}
