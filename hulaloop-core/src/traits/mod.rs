pub mod audio_backend;
pub mod device_source;
pub mod transport_observer;
