//! COM apartment and MMDevice helpers shared by enumeration and streaming.

use std::thread;

use windows::core::PCWSTR;
use windows::Win32::Media::Audio::*;
use windows::Win32::Media::KernelStreaming::WAVE_FORMAT_EXTENSIBLE;
use windows::Win32::Media::Multimedia::{KSDATAFORMAT_SUBTYPE_IEEE_FLOAT, WAVE_FORMAT_IEEE_FLOAT};
use windows::Win32::System::Com::*;

use crate::error::WasapiError;
use crate::format::MixFormat;
use crate::permissions::classify_activation_error;

/// Calls `CoUninitialize` when dropped. Created only after a successful
/// `CoInitializeEx` on the current thread.
pub(crate) struct ComGuard;

impl ComGuard {
    pub(crate) fn init_mta() -> Result<Self, WasapiError> {
        unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }
            .ok()
            .map_err(|e| WasapiError::Com(format!("CoInitializeEx failed: {}", e)))?;
        Ok(Self)
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}

/// Run `f` on a short-lived thread in its own multithreaded apartment.
///
/// Keeps COM objects off the caller's thread, whatever apartment it is in.
pub(crate) fn run_in_mta<T, F>(f: F) -> Result<T, WasapiError>
where
    T: Send,
    F: FnOnce() -> Result<T, WasapiError> + Send,
{
    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name("wasapi-query".into())
            .spawn_scoped(scope, || {
                let _com = ComGuard::init_mta()?;
                f()
            })
            .map_err(|e| WasapiError::Thread(format!("failed to spawn query thread: {}", e)))?;
        handle
            .join()
            .map_err(|_| WasapiError::Thread("query thread panicked".into()))?
    })
}

pub(crate) unsafe fn create_enumerator() -> Result<IMMDeviceEnumerator, WasapiError> {
    CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
        .map_err(|e| WasapiError::Com(format!("failed to create enumerator: {}", e)))
}

/// Activate an audio client on the endpoint with stable id `device_id`.
pub(crate) unsafe fn activate(device_id: &str) -> Result<IAudioClient, WasapiError> {
    let enumerator = create_enumerator()?;
    let wide_id: Vec<u16> = device_id.encode_utf16().chain(std::iter::once(0)).collect();
    let device = enumerator
        .GetDevice(PCWSTR(wide_id.as_ptr()))
        .map_err(|_| WasapiError::DeviceNotFound(device_id.to_string()))?;
    device
        .Activate(CLSCTX_ALL, None)
        .map_err(classify_activation_error)
}

/// Owned `GetMixFormat` result, freed with `CoTaskMemFree` on drop.
pub(crate) struct MixFormatPtr(*mut WAVEFORMATEX);

impl MixFormatPtr {
    pub(crate) unsafe fn of(client: &IAudioClient) -> Result<Self, WasapiError> {
        client
            .GetMixFormat()
            .map(Self)
            .map_err(|e| WasapiError::Com(format!("GetMixFormat failed: {}", e)))
    }

    pub(crate) fn as_ptr(&self) -> *const WAVEFORMATEX {
        self.0
    }

    pub(crate) fn describe(&self) -> MixFormat {
        unsafe {
            let format = &*self.0;
            let tag = format.wFormatTag as u32;
            let is_float = if tag == WAVE_FORMAT_IEEE_FLOAT {
                true
            } else if tag == WAVE_FORMAT_EXTENSIBLE {
                let extensible = self.0 as *const WAVEFORMATEXTENSIBLE;
                let sub_format = std::ptr::addr_of!((*extensible).SubFormat).read_unaligned();
                sub_format == KSDATAFORMAT_SUBTYPE_IEEE_FLOAT
            } else {
                false
            };
            MixFormat {
                sample_rate: format.nSamplesPerSec,
                channels: format.nChannels,
                bits_per_sample: format.wBitsPerSample,
                is_float,
            }
        }
    }
}

impl Drop for MixFormatPtr {
    fn drop(&mut self) {
        unsafe {
            CoTaskMemFree(Some(self.0 as *const _));
        }
    }
}
