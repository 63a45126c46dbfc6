pub mod export;
pub mod metadata;
pub mod settings;
pub mod wav_writer;
