use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::audio_models::StreamFormat;
use crate::models::config::Encoding;
use crate::models::device::Device;

/// Read-only view of the current session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub id: String,
    pub input_device: Device,
    pub output_device: Option<Device>,
    pub format: StreamFormat,
    pub encoding: Encoding,
    pub delay: Duration,
    pub max_duration: Option<Duration>,
    /// Frames in the session file. Final once the session is stopped.
    pub frames: u64,
    /// Active (unpaused) recording time.
    pub recorded: Duration,
    /// Frames rendered by the last playback.
    pub playback_position: u64,
    /// Where the session was last exported, if anywhere.
    pub exported_to: Option<PathBuf>,
}

impl SessionInfo {
    pub fn duration_secs(&self) -> f64 {
        self.format.frames_to_secs(self.frames)
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }
}

/// An in-progress or completed capture and its temporary WAV file.
///
/// The temporary file is deleted when the session is dropped, which is how
/// discard releases it.
pub(crate) struct Session {
    pub(crate) info: SessionInfo,
    temp_path: PathBuf,
}

impl Session {
    pub(crate) fn new(info: SessionInfo, temp_path: PathBuf) -> Self {
        Self { info, temp_path }
    }

    /// Temp file name for a new session.
    pub(crate) fn temp_path_for(temp_directory: &Path, id: &str) -> PathBuf {
        temp_directory.join(format!("session_{}.wav", id))
    }

    pub(crate) fn temp_path(&self) -> &Path {
        &self.temp_path
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        match fs::remove_file(&self.temp_path) {
            Ok(()) => log::debug!("Removed session file {}", self.temp_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                let path = self.temp_path.display();
                log::warn!("Failed to remove session file {}: {}", path, e);
            }
        }
    }
}
