//! Windows microphone privacy check.
//!
//! On Windows 10 1803+, microphone access is controlled by Settings >
//! Privacy > Microphone. Unpackaged desktop apps get no consent prompt;
//! activation simply fails while the toggle is off. Loopback capture of a
//! render endpoint is never restricted.

use windows::Win32::Foundation::E_ACCESSDENIED;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::CLSCTX_ALL;

use crate::com;
use crate::error::WasapiError;

/// Whether the default capture device can be activated.
///
/// Returns `Ok(false)` when there is no capture device, access is denied in
/// the privacy settings, or another application holds the device.
pub fn check_microphone_permission() -> Result<bool, WasapiError> {
    com::run_in_mta(|| unsafe {
        let enumerator = com::create_enumerator()?;
        let device = match enumerator.GetDefaultAudioEndpoint(eCapture, eConsole) {
            Ok(d) => d,
            Err(_) => return Ok(false),
        };
        match device.Activate::<IAudioClient>(CLSCTX_ALL, None) {
            Ok(_) => Ok(true),
            Err(e) => match classify_activation_error(e) {
                WasapiError::AccessDenied | WasapiError::DeviceInUse => Ok(false),
                other => {
                    log::warn!("Unexpected error checking microphone access: {}", other);
                    Ok(true)
                }
            },
        }
    })
}

/// Translate an `IMMDevice::Activate` failure.
pub(crate) fn classify_activation_error(e: windows::core::Error) -> WasapiError {
    let code = e.code();
    if code == E_ACCESSDENIED {
        WasapiError::AccessDenied
    } else if code == AUDCLNT_E_DEVICE_IN_USE {
        WasapiError::DeviceInUse
    } else {
        WasapiError::Com(format!("Activate failed: {}", e))
    }
}
