//! Export encoders: turn decoded session frames into a persisted container.

#[cfg(feature = "mp3")]
pub mod mp3;
pub mod wav;

use std::io::Write;

use crate::models::audio_models::StreamFormat;
use crate::models::config::Encoding;
use crate::models::error::TransportError;

/// Streams interleaved `f32` frames into an output container.
///
/// Call order is `begin`, any number of `encode`, then `finish`.
pub trait FrameEncoder: Send {
    fn encoding(&self) -> Encoding;

    /// Write any container preamble. `total_frames` is the number of frames
    /// that will follow.
    fn begin(&mut self, out: &mut dyn Write, total_frames: u64) -> Result<(), TransportError>;

    fn encode(&mut self, samples: &[f32], out: &mut dyn Write) -> Result<(), TransportError>;

    /// Flush buffered output and write any trailer.
    fn finish(&mut self, out: &mut dyn Write) -> Result<(), TransportError>;
}

/// Build the encoder for `encoding`.
///
/// Fails with `UnsupportedEncoding` when the encoding is not compiled in.
pub fn encoder_for(
    encoding: Encoding,
    format: StreamFormat,
    mp3_bitrate_kbps: u32,
) -> Result<Box<dyn FrameEncoder>, TransportError> {
    encoding.ensure_available()?;
    match encoding {
        Encoding::Wav => Ok(Box::new(wav::WavEncoder::new(format))),
        #[cfg(feature = "mp3")]
        Encoding::Mp3 => Ok(Box::new(mp3::Mp3Encoder::new(format, mp3_bitrate_kbps)?)),
        #[cfg(not(feature = "mp3"))]
        Encoding::Mp3 => {
            let _ = mp3_bitrate_kbps;
            Err(TransportError::UnsupportedEncoding(encoding.to_string()))
        }
    }
}

pub(crate) fn io_err(e: std::io::Error) -> TransportError {
    TransportError::ExportFailed(e.to_string())
}
