use std::io::Write;

use mp3lame_encoder::{Bitrate, Builder, Encoder, FlushNoGap, InterleavedPcm, MonoPcm, Quality};

use super::{io_err, FrameEncoder};
use crate::models::audio_models::StreamFormat;
use crate::models::config::Encoding;
use crate::models::error::TransportError;
use crate::processing::wav_format;

/// MP3 export through LAME.
///
/// Samples are quantized to 16 bits before encoding; LAME is fed one chunk
/// at a time so memory stays bounded regardless of recording length.
pub struct Mp3Encoder {
    encoder: Encoder,
    channels: u16,
    buffer: Vec<u8>,
}

impl Mp3Encoder {
    pub fn new(format: StreamFormat, bitrate_kbps: u32) -> Result<Self, TransportError> {
        let mut builder = Builder::new()
            .ok_or_else(|| TransportError::ExportFailed("cannot create LAME encoder".into()))?;
        builder
            .set_num_channels(format.channels as u8)
            .map_err(|e| lame_err("channels setup", e))?;
        builder
            .set_sample_rate(format.sample_rate)
            .map_err(|e| lame_err("sample rate setup", e))?;
        builder
            .set_brate(bitrate_for(bitrate_kbps))
            .map_err(|e| lame_err("bitrate setup", e))?;
        builder
            .set_quality(Quality::Best)
            .map_err(|e| lame_err("quality setup", e))?;
        let encoder = builder.build().map_err(|e| lame_err("init", e))?;

        Ok(Self {
            encoder,
            channels: format.channels,
            buffer: Vec::new(),
        })
    }
}

impl FrameEncoder for Mp3Encoder {
    fn encoding(&self) -> Encoding {
        Encoding::Mp3
    }

    fn begin(&mut self, _out: &mut dyn Write, _total_frames: u64) -> Result<(), TransportError> {
        Ok(())
    }

    fn encode(&mut self, samples: &[f32], out: &mut dyn Write) -> Result<(), TransportError> {
        let pcm = wav_format::to_i16(samples);
        self.buffer.clear();
        let result = if self.channels == 1 {
            self.encoder.encode_to_vec(MonoPcm(&pcm), &mut self.buffer)
        } else {
            self.encoder
                .encode_to_vec(InterleavedPcm(&pcm), &mut self.buffer)
        };
        result.map_err(|e| lame_err("encode", e))?;
        out.write_all(&self.buffer).map_err(io_err)
    }

    fn finish(&mut self, out: &mut dyn Write) -> Result<(), TransportError> {
        self.buffer.clear();
        self.encoder
            .flush_to_vec::<FlushNoGap>(&mut self.buffer)
            .map_err(|e| lame_err("flush", e))?;
        out.write_all(&self.buffer).map_err(io_err)?;
        out.flush().map_err(io_err)
    }
}

fn lame_err(action: &str, e: impl std::fmt::Debug) -> TransportError {
    TransportError::ExportFailed(format!("mp3 {} failed: {:?}", action, e))
}

/// Nearest LAME bitrate at or below `kbps`.
fn bitrate_for(kbps: u32) -> Bitrate {
    match kbps {
        0..=95 => Bitrate::Kbps64,
        96..=127 => Bitrate::Kbps96,
        128..=159 => Bitrate::Kbps128,
        160..=191 => Bitrate::Kbps160,
        192..=223 => Bitrate::Kbps192,
        224..=255 => Bitrate::Kbps224,
        256..=319 => Bitrate::Kbps256,
        _ => Bitrate::Kbps320,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audio_models::SampleFormat;

    #[test]
    fn encodes_sine_to_mp3_frames() {
        let format = StreamFormat {
            sample_rate: 44100,
            channels: 2,
            sample_format: SampleFormat::Int16,
        };
        let mut encoder = Mp3Encoder::new(format, 128).unwrap();
        let samples: Vec<f32> = (0..44100 * 2)
            .map(|i| ((i / 2) as f32 * 440.0 * std::f32::consts::TAU / 44100.0).sin() * 0.5)
            .collect();

        let mut out = Vec::new();
        encoder.begin(&mut out, 44100).unwrap();
        for chunk in samples.chunks(4096) {
            encoder.encode(chunk, &mut out).unwrap();
        }
        encoder.finish(&mut out).unwrap();

        assert!(out.len() > 1000);
        // MPEG frame sync
        assert_eq!(out[0], 0xFF);
        assert_eq!(out[1] & 0xE0, 0xE0);
    }
}
