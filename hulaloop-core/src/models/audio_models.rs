use serde::{Deserialize, Serialize};

/// On-disk sample representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    Int16,
    Int24,
    Float32,
}

impl SampleFormat {
    pub fn from_bit_depth(bit_depth: u16) -> Option<Self> {
        match bit_depth {
            16 => Some(Self::Int16),
            24 => Some(Self::Int24),
            32 => Some(Self::Float32),
            _ => None,
        }
    }

    pub fn bit_depth(self) -> u16 {
        match self {
            Self::Int16 => 16,
            Self::Int24 => 24,
            Self::Float32 => 32,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        self.bit_depth() as usize / 8
    }

    /// WAV `wFormatTag`: 1 for integer PCM, 3 for IEEE float.
    pub fn format_tag(self) -> u16 {
        match self {
            Self::Int16 | Self::Int24 => 1,
            Self::Float32 => 3,
        }
    }
}

/// Format of a stream opened on a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl StreamFormat {
    /// Size of one interleaved frame on disk, in bytes.
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.sample_format.bytes_per_sample()
    }

    pub fn frames_to_secs(&self, frames: u64) -> f64 {
        frames as f64 / self.sample_rate as f64
    }
}

/// Real-time audio level metering (RMS and peak, 0.0–1.0).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioLevels {
    pub level: f32,
    pub peak_level: f32,
}

/// Diagnostics for debugging transport sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportDiagnostics {
    pub capture_callback_count: u64,
    pub render_callback_count: u64,
    pub frames_captured: u64,
    pub frames_played: u64,
    /// Frames dropped because the capture ring buffer was full.
    pub overrun_frames: u64,
    /// Frames rendered as silence because the playback ring buffer was empty.
    pub underrun_frames: u64,
    pub bytes_written: u64,
}
