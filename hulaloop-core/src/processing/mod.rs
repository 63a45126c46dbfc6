pub mod levels;
pub mod ring_buffer;
pub mod wav_format;
