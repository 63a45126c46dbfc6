use std::io::Write;

use super::{io_err, FrameEncoder};
use crate::models::audio_models::StreamFormat;
use crate::models::config::Encoding;
use crate::models::error::TransportError;
use crate::processing::wav_format;

/// Writes a WAV container in the session's own sample format.
///
/// Because the frame count is known up front the header is written
/// complete, so the output never needs to be seekable.
pub struct WavEncoder {
    format: StreamFormat,
    scratch: Vec<u8>,
}

impl WavEncoder {
    pub fn new(format: StreamFormat) -> Self {
        Self {
            format,
            scratch: Vec::new(),
        }
    }
}

impl FrameEncoder for WavEncoder {
    fn encoding(&self) -> Encoding {
        Encoding::Wav
    }

    fn begin(&mut self, out: &mut dyn Write, total_frames: u64) -> Result<(), TransportError> {
        let data_size = total_frames * self.format.bytes_per_frame() as u64;
        if data_size > (u32::MAX as u64 - wav_format::WAV_HEADER_SIZE as u64) {
            return Err(TransportError::ExportFailed(
                "recording exceeds the 4 GiB WAV limit".into(),
            ));
        }
        let header = wav_format::generate_wav_header(&self.format, data_size as u32);
        out.write_all(&header).map_err(io_err)
    }

    fn encode(&mut self, samples: &[f32], out: &mut dyn Write) -> Result<(), TransportError> {
        self.scratch.clear();
        wav_format::encode_samples(samples, self.format.sample_format, &mut self.scratch);
        out.write_all(&self.scratch).map_err(io_err)
    }

    fn finish(&mut self, out: &mut dyn Write) -> Result<(), TransportError> {
        out.flush().map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audio_models::SampleFormat;
    use std::io::Cursor;

    #[test]
    fn header_declares_frame_count() {
        let format = StreamFormat {
            sample_rate: 44100,
            channels: 2,
            sample_format: SampleFormat::Int16,
        };
        let mut encoder = WavEncoder::new(format);
        let mut out = Vec::new();
        encoder.begin(&mut out, 3).unwrap();
        let samples = [0.25, -0.25, 0.5, -0.5, 0.0, 0.0];
        encoder.encode(&samples, &mut out).unwrap();
        encoder.finish(&mut out).unwrap();

        assert_eq!(out.len(), 44 + 12);
        let info = wav_format::read_wav_info(&mut Cursor::new(&out)).unwrap();
        assert_eq!(info.format, format);
        assert_eq!(info.frame_count(), 3);

        let mut decoded = Vec::new();
        wav_format::decode_samples(&out[44..], SampleFormat::Int16, &mut decoded);
        assert_eq!(decoded, vec![0.25, -0.25, 0.5, -0.5, 0.0, 0.0]);
    }
}
