use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use sha2::{Digest, Sha256};

use crate::encoder::{self, FrameEncoder};
use crate::models::audio_models::StreamFormat;
use crate::models::config::Encoding;
use crate::models::error::TransportError;
use crate::processing::wav_format;

/// Frames decoded per encoder call.
const EXPORT_CHUNK_FRAMES: usize = 4096;

/// What an export wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    pub path: PathBuf,
    pub format: StreamFormat,
    pub frames: u64,
    pub bytes_written: u64,
    /// SHA-256 hex digest of the exported file.
    pub checksum: String,
}

/// Resolve where an export should land.
///
/// An existing directory gets a timestamped file name; a path without an
/// extension gets the encoding's extension.
pub fn resolve_target(path: &Path, encoding: Encoding, now: DateTime<Local>) -> PathBuf {
    if path.is_dir() {
        return path.join(format!(
            "hulaloop_{}.{}",
            now.format("%Y%m%d_%H%M%S"),
            encoding.extension()
        ));
    }
    if path.extension().is_none() {
        return path.with_extension(encoding.extension());
    }
    path.to_path_buf()
}

/// Transcode the finalized session WAV at `source` into `target`.
///
/// Output goes to a hidden sibling `.partial` file which is synced and then
/// renamed over `target`. On any failure the partial file is removed, the
/// source is left untouched and `ExportFailed` is returned.
pub fn export_session(
    source: &Path,
    target: &Path,
    encoding: Encoding,
    mp3_bitrate_kbps: u32,
) -> Result<ExportOutcome, TransportError> {
    let partial = partial_path(target)?;
    match write_partial(source, &partial, encoding, mp3_bitrate_kbps) {
        Ok((format, frames, bytes_written, checksum)) => {
            if let Err(e) = fs::rename(&partial, target) {
                let _ = fs::remove_file(&partial);
                return Err(TransportError::ExportFailed(format!(
                    "failed to move export into place at {}: {}",
                    target.display(),
                    e
                )));
            }
            Ok(ExportOutcome {
                path: target.to_path_buf(),
                format,
                frames,
                bytes_written,
                checksum,
            })
        }
        Err(e) => {
            let _ = fs::remove_file(&partial);
            Err(match e {
                TransportError::ExportFailed(_) | TransportError::UnsupportedEncoding(_) => e,
                other => TransportError::ExportFailed(other.to_string()),
            })
        }
    }
}

fn partial_path(target: &Path) -> Result<PathBuf, TransportError> {
    let Some(name) = target.file_name() else {
        return Err(TransportError::ExportFailed(format!(
            "invalid export path: {}",
            target.display()
        )));
    };
    let partial = format!(".{}.partial", name.to_string_lossy());
    Ok(target.with_file_name(partial))
}

fn write_partial(
    source: &Path,
    partial: &Path,
    encoding: Encoding,
    mp3_bitrate_kbps: u32,
) -> Result<(StreamFormat, u64, u64, String), TransportError> {
    let file = File::open(source).map_err(|e| {
        TransportError::ExportFailed(format!("failed to open session file: {}", e))
    })?;
    let mut reader = BufReader::new(file);
    let info = wav_format::read_wav_info(&mut reader)?;
    let mut encoder = encoder::encoder_for(encoding, info.format, mp3_bitrate_kbps)?;

    if let Some(parent) = partial.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(encoder::io_err)?;
        }
    }
    let file = File::create(partial).map_err(encoder::io_err)?;
    let mut out = HashingWriter::new(BufWriter::new(file));

    let frames = transcode(&mut reader, &info, encoder.as_mut(), &mut out)?;

    let (writer, bytes_written, checksum) = out.finish();
    let file = writer
        .into_inner()
        .map_err(|e| TransportError::ExportFailed(e.error().to_string()))?;
    file.sync_all().map_err(encoder::io_err)?;

    log::debug!(
        "Encoded {} frames as {} ({} bytes)",
        frames,
        encoder.encoding(),
        bytes_written
    );
    Ok((info.format, frames, bytes_written, checksum))
}

fn transcode<R: Read + Seek>(
    reader: &mut R,
    info: &wav_format::WavInfo,
    encoder: &mut dyn FrameEncoder,
    out: &mut dyn Write,
) -> Result<u64, TransportError> {
    let frame_bytes = info.format.bytes_per_frame();
    let total_frames = info.frame_count();
    reader
        .seek(SeekFrom::Start(info.data_offset))
        .map_err(encoder::io_err)?;

    encoder.begin(out, total_frames)?;
    let mut raw = vec![0u8; EXPORT_CHUNK_FRAMES * frame_bytes];
    let mut samples = Vec::with_capacity(EXPORT_CHUNK_FRAMES * info.format.channels as usize);
    let mut remaining = total_frames;
    while remaining > 0 {
        let frames = (remaining as usize).min(EXPORT_CHUNK_FRAMES);
        let bytes = &mut raw[..frames * frame_bytes];
        reader.read_exact(bytes).map_err(encoder::io_err)?;
        samples.clear();
        wav_format::decode_samples(bytes, info.format.sample_format, &mut samples);
        encoder.encode(&samples, out)?;
        remaining -= frames as u64;
    }
    encoder.finish(out)?;
    Ok(total_frames)
}

/// Counts and hashes everything written through it.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    fn finish(self) -> (W, u64, String) {
        let digest = self.hasher.finalize();
        (self.inner, self.written, hex_encode(&digest))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Compute the SHA-256 hex digest of a file without loading it whole.
pub fn sha256_file(path: &Path) -> Result<String, TransportError> {
    let mut file = File::open(path).map_err(|e| {
        TransportError::StorageError(format!("failed to read file for checksum: {}", e))
    })?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| TransportError::StorageError(e.to_string()))?;
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audio_models::SampleFormat;
    use crate::storage::wav_writer::WavFileWriter;
    use chrono::TimeZone;

    fn session_file(dir: &Path, sample_format: SampleFormat, samples: &[f32]) -> PathBuf {
        let path = dir.join("session.wav");
        let format = StreamFormat {
            sample_rate: 48000,
            channels: 2,
            sample_format,
        };
        let mut writer = WavFileWriter::create(path.clone(), format).unwrap();
        writer.write_samples(samples).unwrap();
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn wav_export_copies_session_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<f32> = (0..20_000)
            .map(|i| ((i % 200) as f32 - 100.0) / 128.0)
            .collect();
        let source = session_file(dir.path(), SampleFormat::Int16, &samples);
        let target = dir.path().join("out.wav");

        let outcome = export_session(&source, &target, Encoding::Wav, 192).unwrap();

        assert_eq!(outcome.frames, 10_000);
        assert_eq!(fs::read(&target).unwrap(), fs::read(&source).unwrap());
        assert_eq!(outcome.bytes_written, 44 + 10_000 * 4);
        assert_eq!(outcome.checksum, sha256_file(&target).unwrap());
        assert!(!dir.path().join(".out.wav.partial").exists());
    }

    #[test]
    fn float_export_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let samples = vec![0.123_456_7, -0.987_654_3, 1.5, -2.0];
        let source = session_file(dir.path(), SampleFormat::Float32, &samples);
        let target = dir.path().join("float.wav");
        export_session(&source, &target, Encoding::Wav, 192).unwrap();

        let bytes = fs::read(&target).unwrap();
        let mut decoded = Vec::new();
        wav_format::decode_samples(&bytes[44..], SampleFormat::Float32, &mut decoded);
        assert_eq!(decoded, samples);
    }

    #[test]
    fn failed_export_leaves_no_partial_and_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = session_file(dir.path(), SampleFormat::Int16, &[0.0; 8]);
        let before = fs::read(&source).unwrap();

        // The target's parent is a regular file, so nothing can be created under it.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let target = blocker.join("out.wav");

        let result = export_session(&source, &target, Encoding::Wav, 192);
        assert!(matches!(result, Err(TransportError::ExportFailed(_))));
        assert!(!target.exists());
        assert_eq!(fs::read(&source).unwrap(), before);
    }

    #[test]
    fn missing_source_is_export_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.wav");
        let target = dir.path().join("o.wav");
        let result = export_session(&missing, &target, Encoding::Wav, 192);
        assert!(matches!(result, Err(TransportError::ExportFailed(_))));
    }

    #[cfg(not(feature = "mp3"))]
    #[test]
    fn mp3_export_is_unsupported_without_feature() {
        let dir = tempfile::tempdir().unwrap();
        let source = session_file(dir.path(), SampleFormat::Int16, &[0.0; 8]);
        let target = dir.path().join("o.mp3");
        let result = export_session(&source, &target, Encoding::Mp3, 192);
        assert!(matches!(
            result,
            Err(TransportError::UnsupportedEncoding(_))
        ));
        assert!(!dir.path().join(".o.mp3.partial").exists());
    }

    #[test]
    fn directory_target_gets_timestamped_name() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let target = resolve_target(dir.path(), Encoding::Wav, now);
        assert_eq!(target, dir.path().join("hulaloop_20240309_140507.wav"));
    }

    #[test]
    fn bare_name_gets_extension() {
        let now = Local::now();
        let target = resolve_target(Path::new("/nonexistent/take1"), Encoding::Mp3, now);
        assert_eq!(target, PathBuf::from("/nonexistent/take1.mp3"));
        let kept = resolve_target(Path::new("/nonexistent/take1.wav"), Encoding::Mp3, now);
        assert_eq!(kept, PathBuf::from("/nonexistent/take1.wav"));
    }
}
