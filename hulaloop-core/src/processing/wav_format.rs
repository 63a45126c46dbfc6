/// WAV file format utilities.
///
/// Generates standard 44-byte RIFF WAV headers, patches header fields after
/// recording completes, parses headers back for playback and transcoding,
/// and converts between `f32` frames and on-disk sample bytes.
use std::io::{Read, Seek, SeekFrom};

use crate::models::audio_models::{SampleFormat, StreamFormat};
use crate::models::error::TransportError;

/// Size of the standard WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

const I16_SCALE: f32 = 32768.0;
const I24_SCALE: f32 = 8_388_608.0;

/// Generate a 44-byte WAV RIFF header.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    file size - 8 (36 + data_size)
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (format chunk size)
/// [20-21]  format tag (1 = PCM, 3 = IEEE float)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * channels * bit_depth / 8
/// [32-33]  block_align = channels * bit_depth / 8
/// [34-35]  bit_depth
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(format: &StreamFormat, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let bit_depth = format.sample_format.bit_depth();
    let channels = format.channels;
    let byte_rate = format.sample_rate * channels as u32 * bit_depth as u32 / 8;
    let block_align = channels * bit_depth / 8;
    let chunk_size = 36 + data_size;

    let mut header = [0u8; WAV_HEADER_SIZE];

    // RIFF chunk descriptor
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    // fmt sub-chunk
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&format.sample_format.format_tag().to_le_bytes());
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&bit_depth.to_le_bytes());

    // data sub-chunk
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// Patch the file-size field at offset 4 (RIFF chunk size = file_size - 8).
pub fn patch_file_size(header: &mut [u8], total_file_size: u64) {
    let chunk_size = total_file_size.saturating_sub(8).min(u32::MAX as u64) as u32;
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
}

/// Patch the data-size field at offset 40.
pub fn patch_data_size(header: &mut [u8], data_size: u64) {
    let data_size_u32 = data_size.min(u32::MAX as u64) as u32;
    header[40..44].copy_from_slice(&data_size_u32.to_le_bytes());
}

/// Parsed location and format of a WAV data chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    pub format: StreamFormat,
    pub data_offset: u64,
    pub data_len: u64,
}

impl WavInfo {
    pub fn frame_count(&self) -> u64 {
        self.data_len / self.format.bytes_per_frame() as u64
    }
}

/// Parse a RIFF/WAVE header, skipping chunks other than `fmt ` and `data`.
///
/// A data length of zero or one running past the end of the file (a header
/// that was never finalized) is clamped to the bytes actually present.
pub fn read_wav_info<R: Read + Seek>(reader: &mut R) -> Result<WavInfo, TransportError> {
    let file_len = reader.seek(SeekFrom::End(0)).map_err(storage_err)?;
    reader.seek(SeekFrom::Start(0)).map_err(storage_err)?;

    let mut riff = [0u8; 12];
    reader.read_exact(&mut riff).map_err(storage_err)?;
    if &riff[0..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
        return Err(TransportError::StorageError("not a RIFF/WAVE file".into()));
    }

    let mut format: Option<StreamFormat> = None;
    let mut pos = 12u64;
    loop {
        let mut chunk_header = [0u8; 8];
        if reader.read_exact(&mut chunk_header).is_err() {
            return Err(TransportError::StorageError("missing data chunk".into()));
        }
        let (id, size) = chunk_header.split_at(4);
        let size = u32::from_le_bytes([size[0], size[1], size[2], size[3]]) as u64;
        pos += 8;

        match id {
            b"fmt " => {
                let mut fmt = vec![0u8; size as usize];
                reader.read_exact(&mut fmt).map_err(storage_err)?;
                if size % 2 == 1 {
                    reader.seek(SeekFrom::Current(1)).map_err(storage_err)?;
                }
                format = Some(parse_fmt_chunk(&fmt)?);
            }
            b"data" => {
                let Some(format) = format else {
                    return Err(TransportError::StorageError(
                        "data chunk before fmt chunk".into(),
                    ));
                };
                let remaining = file_len.saturating_sub(pos);
                let data_len = if size == 0 || size > remaining {
                    remaining
                } else {
                    size
                };
                let frame_bytes = format.bytes_per_frame() as u64;
                return Ok(WavInfo {
                    format,
                    data_offset: pos,
                    data_len: data_len - data_len % frame_bytes,
                });
            }
            _ => {
                reader
                    .seek(SeekFrom::Current((size + size % 2) as i64))
                    .map_err(storage_err)?;
            }
        }
        pos += size + size % 2;
    }
}

fn parse_fmt_chunk(fmt: &[u8]) -> Result<StreamFormat, TransportError> {
    if fmt.len() < 16 {
        return Err(TransportError::StorageError("fmt chunk too short".into()));
    }
    let tag = u16::from_le_bytes([fmt[0], fmt[1]]);
    let channels = u16::from_le_bytes([fmt[2], fmt[3]]);
    let sample_rate = u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]);
    let bit_depth = u16::from_le_bytes([fmt[14], fmt[15]]);

    let sample_format = match (tag, bit_depth) {
        (1, 16) => SampleFormat::Int16,
        (1, 24) => SampleFormat::Int24,
        (3, 32) => SampleFormat::Float32,
        _ => {
            return Err(TransportError::StorageError(format!(
                "unsupported WAV format tag {} with {} bits",
                tag, bit_depth
            )));
        }
    };
    if channels == 0 {
        return Err(TransportError::StorageError(
            "WAV declares zero channels".into(),
        ));
    }

    Ok(StreamFormat {
        sample_rate,
        channels,
        sample_format,
    })
}

/// Convert `f32` samples to little-endian sample bytes, appending to `out`.
///
/// Integer formats clamp to the representable range. Samples produced by
/// [`decode_samples`] convert back to the exact original integers.
pub fn encode_samples(samples: &[f32], sample_format: SampleFormat, out: &mut Vec<u8>) {
    out.reserve(samples.len() * sample_format.bytes_per_sample());
    match sample_format {
        SampleFormat::Int16 => {
            for &sample in samples {
                out.extend_from_slice(&quantize_i16(sample).to_le_bytes());
            }
        }
        SampleFormat::Int24 => {
            for &sample in samples {
                let scaled = (sample * I24_SCALE).round();
                let value = scaled.clamp(-8_388_608.0, 8_388_607.0) as i32;
                out.extend_from_slice(&value.to_le_bytes()[..3]);
            }
        }
        SampleFormat::Float32 => {
            for &sample in samples {
                out.extend_from_slice(&sample.to_le_bytes());
            }
        }
    }
}

/// Convert little-endian sample bytes back to `f32`, appending to `out`.
///
/// A trailing partial sample is ignored.
pub fn decode_samples(bytes: &[u8], sample_format: SampleFormat, out: &mut Vec<f32>) {
    let width = sample_format.bytes_per_sample();
    out.reserve(bytes.len() / width);
    for chunk in bytes.chunks_exact(width) {
        let sample = match sample_format {
            SampleFormat::Int16 => i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / I16_SCALE,
            SampleFormat::Int24 => {
                // Sign-extend by placing the 24 bits in the top of an i32.
                let value = i32::from_le_bytes([0, chunk[0], chunk[1], chunk[2]]) >> 8;
                value as f32 / I24_SCALE
            }
            SampleFormat::Float32 => f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
        };
        out.push(sample);
    }
}

/// Convert `f32` samples to `i16`, as used by the MP3 encoder.
pub fn to_i16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| quantize_i16(s)).collect()
}

fn quantize_i16(sample: f32) -> i16 {
    let scaled = (sample * I16_SCALE).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

fn storage_err(e: std::io::Error) -> TransportError {
    TransportError::StorageError(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn stereo_16(rate: u32) -> StreamFormat {
        StreamFormat {
            sample_rate: rate,
            channels: 2,
            sample_format: SampleFormat::Int16,
        }
    }

    fn le_u16(bytes: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([bytes[at], bytes[at + 1]])
    }

    fn le_u32(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    }

    #[test]
    fn header_size_is_44_bytes() {
        let header = generate_wav_header(&stereo_16(48000), 0);
        assert_eq!(header.len(), 44);
    }

    #[test]
    fn header_riff_magic() {
        let header = generate_wav_header(&stereo_16(48000), 0);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(&header[36..40], b"data");
    }

    #[test]
    fn header_48khz_stereo_16bit() {
        let header = generate_wav_header(&stereo_16(48000), 9600);

        assert_eq!(le_u16(&header, 20), 1);
        assert_eq!(le_u16(&header, 22), 2);
        assert_eq!(le_u32(&header, 24), 48000);
        assert_eq!(le_u32(&header, 28), 192000);
        assert_eq!(le_u16(&header, 32), 4);
        assert_eq!(le_u16(&header, 34), 16);
        assert_eq!(le_u32(&header, 40), 9600);
        assert_eq!(le_u32(&header, 4), 36 + 9600);
    }

    #[test]
    fn float_header_uses_ieee_tag() {
        let format = StreamFormat {
            sample_rate: 44100,
            channels: 1,
            sample_format: SampleFormat::Float32,
        };
        let header = generate_wav_header(&format, 0);
        assert_eq!(le_u16(&header, 20), 3);
        assert_eq!(le_u16(&header, 34), 32);
    }

    #[test]
    fn patch_sizes() {
        let mut header = generate_wav_header(&stereo_16(48000), 0);

        patch_data_size(&mut header, 19200);
        assert_eq!(le_u32(&header, 40), 19200);

        patch_file_size(&mut header, 19200 + 44);
        assert_eq!(le_u32(&header, 4), 19200 + 36);
    }

    #[test]
    fn parse_finalized_header() {
        let mut bytes = generate_wav_header(&stereo_16(44100), 8).to_vec();
        bytes.extend_from_slice(&[0u8; 8]);

        let info = read_wav_info(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(info.format, stereo_16(44100));
        assert_eq!(info.data_offset, 44);
        assert_eq!(info.data_len, 8);
        assert_eq!(info.frame_count(), 2);
    }

    #[test]
    fn parse_unfinalized_header_uses_file_length() {
        let mut bytes = generate_wav_header(&stereo_16(48000), 0).to_vec();
        bytes.extend_from_slice(&[0u8; 14]); // 3 whole frames + 2 stray bytes

        let info = read_wav_info(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(info.data_len, 12);
        assert_eq!(info.frame_count(), 3);
    }

    #[test]
    fn parse_skips_unknown_chunks() {
        let header = generate_wav_header(&stereo_16(48000), 4);
        let mut bytes = header[..36].to_vec();
        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 3, 0]); // odd size + pad byte
        bytes.extend_from_slice(&header[36..]);
        bytes.extend_from_slice(&[9u8; 4]);

        let info = read_wav_info(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(info.data_offset, 56);
        assert_eq!(info.data_len, 4);
    }

    #[test]
    fn parse_skips_pad_after_odd_fmt_chunk() {
        let header = generate_wav_header(&stereo_16(48000), 4);
        let mut bytes = header[..12].to_vec();
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&17u32.to_le_bytes());
        bytes.extend_from_slice(&header[20..36]);
        bytes.extend_from_slice(&[0, 0]); // one extension byte + pad byte
        bytes.extend_from_slice(&header[36..]);
        bytes.extend_from_slice(&[9u8; 4]);

        let info = read_wav_info(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(info.format, stereo_16(48000));
        assert_eq!(info.data_offset, 46);
        assert_eq!(info.data_len, 4);
    }

    #[test]
    fn parse_rejects_non_wave() {
        let result = read_wav_info(&mut Cursor::new(b"OggS0000000000000000".to_vec()));
        assert!(matches!(result, Err(TransportError::StorageError(_))));
    }

    #[test]
    fn int16_round_trip_is_exact() {
        let originals: Vec<i16> = vec![0, 1, -1, 1234, -1234, i16::MAX, i16::MIN];
        let samples: Vec<f32> = originals.iter().map(|&v| v as f32 / 32768.0).collect();

        let mut bytes = Vec::new();
        encode_samples(&samples, SampleFormat::Int16, &mut bytes);
        let mut decoded = Vec::new();
        decode_samples(&bytes, SampleFormat::Int16, &mut decoded);

        let back: Vec<i16> = to_i16(&decoded);
        assert_eq!(back, originals);
    }

    #[test]
    fn int24_round_trip_is_exact() {
        let originals: Vec<i32> = vec![0, 1, -1, 8_388_607, -8_388_608, 4_000_000];
        let samples: Vec<f32> = originals.iter().map(|&v| v as f32 / 8_388_608.0).collect();

        let mut bytes = Vec::new();
        encode_samples(&samples, SampleFormat::Int24, &mut bytes);
        assert_eq!(bytes.len(), originals.len() * 3);

        let mut decoded = Vec::new();
        decode_samples(&bytes, SampleFormat::Int24, &mut decoded);
        assert_eq!(decoded, samples);
    }

    #[test]
    fn encode_clamps_out_of_range() {
        let mut bytes = Vec::new();
        encode_samples(&[2.0, -3.0], SampleFormat::Int16, &mut bytes);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MIN);
    }
}
