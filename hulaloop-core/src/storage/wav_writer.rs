use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::models::audio_models::StreamFormat;
use crate::models::error::TransportError;
use crate::processing::wav_format;

/// Totals reported when a [`WavFileWriter`] is finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavSummary {
    pub path: PathBuf,
    pub format: StreamFormat,
    pub frames: u64,
    /// Bytes in the data chunk, excluding the header.
    pub data_bytes: u64,
}

/// Streaming WAV file writer.
///
/// ## File Format
/// ```text
/// [44-byte WAV header, sizes zeroed until finalize]
/// [interleaved little-endian samples...]
/// ```
///
/// Frames are appended as they arrive; the RIFF and data sizes are patched
/// in place by [`finalize`](Self::finalize). A writer dropped without
/// finalizing leaves a readable file whose header sizes are zero, which
/// [`wav_format::read_wav_info`] recovers from the file length.
pub struct WavFileWriter {
    file_path: PathBuf,
    format: StreamFormat,
    file: BufWriter<File>,
    data_bytes: u64,
    scratch: Vec<u8>,
}

impl WavFileWriter {
    /// Create the file (and its directory) and write the initial header.
    pub fn create(file_path: PathBuf, format: StreamFormat) -> Result<Self, TransportError> {
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                TransportError::StorageError(format!("failed to create directory: {}", e))
            })?;
        }

        let file = File::create(&file_path)
            .map_err(|e| TransportError::StorageError(format!("failed to create file: {}", e)))?;
        let mut file = BufWriter::new(file);

        let header = wav_format::generate_wav_header(&format, 0);
        file.write_all(&header)
            .map_err(|e| TransportError::StorageError(format!("write failed: {}", e)))?;

        log::debug!("Opened session file {}", file_path.display());
        Ok(Self {
            file_path,
            format,
            file,
            data_bytes: 0,
            scratch: Vec::new(),
        })
    }

    /// Append interleaved samples. A trailing partial frame is not written.
    pub fn write_samples(&mut self, samples: &[f32]) -> Result<(), TransportError> {
        let channels = self.format.channels as usize;
        let whole = samples.len() - samples.len() % channels;
        if whole == 0 {
            return Ok(());
        }

        self.scratch.clear();
        wav_format::encode_samples(
            &samples[..whole],
            self.format.sample_format,
            &mut self.scratch,
        );
        self.file
            .write_all(&self.scratch)
            .map_err(|e| TransportError::StorageError(format!("write failed: {}", e)))?;
        self.data_bytes += self.scratch.len() as u64;
        Ok(())
    }

    /// Patch the header sizes, flush and sync the file.
    pub fn finalize(mut self) -> Result<WavSummary, TransportError> {
        let mut header = wav_format::generate_wav_header(&self.format, 0);
        wav_format::patch_data_size(&mut header, self.data_bytes);
        let file_size = self.data_bytes + wav_format::WAV_HEADER_SIZE as u64;
        wav_format::patch_file_size(&mut header, file_size);

        self.file.flush().map_err(storage_err)?;
        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(4)).map_err(storage_err)?;
        file.write_all(&header[4..8]).map_err(storage_err)?;
        file.seek(SeekFrom::Start(40)).map_err(storage_err)?;
        file.write_all(&header[40..44]).map_err(storage_err)?;
        file.sync_all().map_err(storage_err)?;

        let summary = WavSummary {
            path: self.file_path,
            format: self.format,
            frames: self.data_bytes / self.format.bytes_per_frame() as u64,
            data_bytes: self.data_bytes,
        };
        log::debug!(
            "Finalized session file {} ({} frames)",
            summary.path.display(),
            summary.frames
        );
        Ok(summary)
    }

    pub fn frames_written(&self) -> u64 {
        self.data_bytes / self.format.bytes_per_frame() as u64
    }

    /// Data bytes written so far (excluding the header).
    pub fn bytes_written(&self) -> u64 {
        self.data_bytes
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

fn storage_err(e: std::io::Error) -> TransportError {
    TransportError::StorageError(e.to_string())
}
