use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::audio_models::{SampleFormat, StreamFormat};
use super::error::TransportError;

/// Persisted container format for exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Wav,
    Mp3,
}

impl Encoding {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
        }
    }

    /// Whether this build can produce the encoding.
    pub fn is_available(self) -> bool {
        match self {
            Self::Wav => true,
            Self::Mp3 => cfg!(feature = "mp3"),
        }
    }

    /// Fails with `UnsupportedEncoding` when the build cannot produce it.
    pub fn ensure_available(self) -> Result<Self, TransportError> {
        if self.is_available() {
            Ok(self)
        } else {
            Err(TransportError::UnsupportedEncoding(format!(
                "{} support is not compiled in",
                self
            )))
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wav => f.write_str("WAV"),
            Self::Mp3 => f.write_str("MP3"),
        }
    }
}

impl FromStr for Encoding {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wav" => Ok(Self::Wav),
            "mp3" => Ok(Self::Mp3),
            other => Err(TransportError::UnsupportedEncoding(other.to_string())),
        }
    }
}

/// Configuration for the transport.
///
/// Serializable so front ends can persist it as a settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfiguration {
    /// Sample rate in Hz requested from the device (default: 48000).
    pub sample_rate: u32,

    /// Number of interleaved channels (default: 2). Valid values: 1, 2.
    pub channels: u16,

    /// Bit depth for the session file (default: 16). Valid values: 16, 24, 32 (float).
    pub bit_depth: u16,

    /// Export container (default: WAV).
    pub encoding: Encoding,

    /// Countdown before recording starts.
    pub delay: Duration,

    /// Recording/playback limit (None = unlimited).
    pub max_duration: Option<Duration>,

    /// Ring buffer capacity expressed in seconds of audio (default: 0.5).
    pub ring_buffer_secs: f64,

    /// Directory holding in-progress session files.
    pub temp_directory: PathBuf,

    /// Write a `.metadata.json` sidecar next to each export.
    pub write_metadata: bool,

    /// MP3 bitrate in kbps (default: 192).
    pub mp3_bitrate_kbps: u32,
}

impl TransportConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if !(8000..=192_000).contains(&self.sample_rate) {
            return Err(format!("unsupported sample rate: {}", self.sample_rate));
        }
        if SampleFormat::from_bit_depth(self.bit_depth).is_none() {
            return Err(format!("unsupported bit depth: {}", self.bit_depth));
        }
        if ![1, 2].contains(&self.channels) {
            return Err(format!("unsupported channel count: {}", self.channels));
        }
        if !(self.ring_buffer_secs > 0.0 && self.ring_buffer_secs <= 10.0) {
            return Err(format!(
                "ring buffer must hold 0-10 seconds, got {}",
                self.ring_buffer_secs
            ));
        }
        Ok(())
    }

    pub fn stream_format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            sample_format: SampleFormat::from_bit_depth(self.bit_depth)
                .unwrap_or(SampleFormat::Int16),
        }
    }

    /// Ring buffer capacity in frames.
    pub fn ring_buffer_frames(&self) -> usize {
        ((self.sample_rate as f64 * self.ring_buffer_secs) as usize).max(1)
    }
}

impl Default for TransportConfiguration {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            bit_depth: 16,
            encoding: Encoding::Wav,
            delay: Duration::ZERO,
            max_duration: None,
            ring_buffer_secs: 0.5,
            temp_directory: std::env::temp_dir().join("hulaloop"),
            write_metadata: false,
            mp3_bitrate_kbps: 192,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid_wav() {
        let config = TransportConfiguration::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.encoding, Encoding::Wav);
        assert_eq!(config.ring_buffer_frames(), 24000);
    }

    #[test]
    fn rejects_bad_values() {
        let bad_rate = TransportConfiguration {
            sample_rate: 0,
            ..Default::default()
        };
        assert!(bad_rate.validate().is_err());

        let bad_depth = TransportConfiguration {
            bit_depth: 12,
            ..Default::default()
        };
        assert!(bad_depth.validate().is_err());

        let bad_channels = TransportConfiguration {
            channels: 6,
            ..Default::default()
        };
        assert!(bad_channels.validate().is_err());

        let bad_ring = TransportConfiguration {
            ring_buffer_secs: 0.0,
            ..Default::default()
        };
        assert!(bad_ring.validate().is_err());
    }

    #[test]
    fn encoding_parsing() {
        assert_eq!("WAV".parse::<Encoding>(), Ok(Encoding::Wav));
        assert_eq!("mp3".parse::<Encoding>(), Ok(Encoding::Mp3));
        assert!(matches!(
            "ogg".parse::<Encoding>(),
            Err(TransportError::UnsupportedEncoding(_))
        ));
    }

    #[cfg(not(feature = "mp3"))]
    #[test]
    fn mp3_unavailable_without_feature() {
        assert!(matches!(
            Encoding::Mp3.ensure_available(),
            Err(TransportError::UnsupportedEncoding(_))
        ));
        assert_eq!(Encoding::Wav.ensure_available(), Ok(Encoding::Wav));
    }

    #[test]
    fn stream_format_from_bit_depth() {
        let config = TransportConfiguration {
            bit_depth: 32,
            channels: 1,
            ..Default::default()
        };
        let format = config.stream_format();
        assert_eq!(format.sample_format, SampleFormat::Float32);
        assert_eq!(format.bytes_per_frame(), 4);
    }
}
