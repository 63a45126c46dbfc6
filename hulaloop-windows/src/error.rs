use thiserror::Error;

use hulaloop_core::models::error::TransportError;

/// Failures inside the WASAPI layer, before they are reported as
/// [`TransportError`]s.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WasapiError {
    #[error("COM call failed: {0}")]
    Com(String),

    #[error("endpoint not found: {0}")]
    DeviceNotFound(String),

    #[error("device mix format is {mix}, requested {requested}")]
    FormatMismatch { mix: String, requested: String },

    #[error("microphone access is disabled in Windows privacy settings")]
    AccessDenied,

    #[error("device is in use by another application")]
    DeviceInUse,

    #[error("stream failed: {0}")]
    Stream(String),

    #[error("thread error: {0}")]
    Thread(String),
}

impl From<WasapiError> for TransportError {
    fn from(e: WasapiError) -> Self {
        match e {
            WasapiError::DeviceNotFound(id) => TransportError::DeviceNotFound(id),
            WasapiError::FormatMismatch { .. }
            | WasapiError::AccessDenied
            | WasapiError::DeviceInUse => TransportError::DeviceOpenFailed(e.to_string()),
            WasapiError::Com(_) | WasapiError::Stream(_) | WasapiError::Thread(_) => {
                TransportError::StreamFailed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_problems_map_to_device_open_failed() {
        let denied = "microphone access is disabled in Windows privacy settings";
        assert_eq!(
            TransportError::from(WasapiError::AccessDenied),
            TransportError::DeviceOpenFailed(denied.into())
        );
        assert!(matches!(
            TransportError::from(WasapiError::FormatMismatch {
                mix: "44100 Hz".into(),
                requested: "48000 Hz".into(),
            }),
            TransportError::DeviceOpenFailed(_)
        ));
    }

    #[test]
    fn missing_endpoint_keeps_its_id() {
        assert_eq!(
            TransportError::from(WasapiError::DeviceNotFound("{0.0.1.00000000}".into())),
            TransportError::DeviceNotFound("{0.0.1.00000000}".into())
        );
    }

    #[test]
    fn runtime_failures_are_stream_failures() {
        assert!(matches!(
            TransportError::from(WasapiError::Stream("device was removed".into())),
            TransportError::StreamFailed(_)
        ));
    }
}
