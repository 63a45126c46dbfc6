use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::audio_models::StreamFormat;
use super::config::Encoding;

/// Result returned when an export completes successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportResult {
    pub file_path: PathBuf,
    pub encoding: Encoding,
    pub duration_secs: f64,
    pub frames: u64,
    pub bytes_written: u64,
    pub metadata: RecordingMetadata,
    pub checksum: String,
}

/// Metadata describing an exported recording.
///
/// Serializable for the optional JSON sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub duration_secs: f64,
    pub file_path: String,
    pub checksum: String,
    pub encoding: Encoding,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub input_device: Option<String>,
    pub created_at: String,
}

impl RecordingMetadata {
    pub fn new(
        session_id: &str,
        format: &StreamFormat,
        encoding: Encoding,
        duration_secs: f64,
        file_path: &str,
        checksum: &str,
        input_device: Option<String>,
    ) -> Self {
        Self {
            id: session_id.to_string(),
            duration_secs,
            file_path: file_path.to_string(),
            checksum: checksum.to_string(),
            encoding,
            sample_rate: format.sample_rate,
            channels: format.channels,
            bit_depth: format.sample_format.bit_depth(),
            input_device,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
