use std::fmt;

use hulaloop_core::models::audio_models::StreamFormat;

use crate::error::WasapiError;

/// The shared-mode mix format of an endpoint.
///
/// Shared-mode streams run at exactly this rate and channel count, so a
/// request is either an exact match or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub is_float: bool,
}

impl MixFormat {
    /// Check that frames of `requested` can be exchanged as-is.
    pub fn check(&self, requested: &StreamFormat) -> Result<(), WasapiError> {
        let usable = self.is_float
            && self.bits_per_sample == 32
            && self.sample_rate == requested.sample_rate
            && self.channels == requested.channels;
        if usable {
            Ok(())
        } else {
            Err(WasapiError::FormatMismatch {
                mix: self.to_string(),
                requested: format!("{} Hz, {} ch", requested.sample_rate, requested.channels),
            })
        }
    }
}

impl fmt::Display for MixFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}-bit {}",
            self.sample_rate,
            self.channels,
            self.bits_per_sample,
            if self.is_float { "float" } else { "PCM" }
        )
    }
}
