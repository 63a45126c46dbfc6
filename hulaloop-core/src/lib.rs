//! # hulaloop-core
//!
//! Platform-agnostic core of the HulaLoop loopback recorder.
//!
//! Provides the record/playback transport state machine, device registry,
//! lock-free frame buffering, WAV session storage and export encoding.
//! Platform backends (Windows WASAPI) implement [`AudioBackend`] and
//! [`DeviceSource`] and plug into the generic [`Transport`].
//!
//! ## Architecture
//!
//! ```text
//! hulaloop-core (this crate)
//! ├── traits/       ← AudioBackend, DeviceSource, TransportObserver
//! ├── models/       ← TransportError, TransportState, TransportConfiguration, Device, etc.
//! ├── registry/     ← DeviceRegistry (enumeration snapshot, name/ordinal resolution)
//! ├── processing/   ← RingBuffer, LevelMeter, WAV header/sample codecs
//! ├── encoder/      ← FrameEncoder (WAV, MP3 behind the `mp3` feature)
//! ├── session/      ← Transport (state machine), capture pump, playback feeder, timers
//! ├── storage/      ← session WAV writer, export, metadata sidecar, settings file
//! └── observer      ← ChannelObserver (notifications as crossbeam channel events)
//! ```

pub mod encoder;
pub mod models;
pub mod observer;
pub mod processing;
pub mod registry;
pub mod session;
pub mod storage;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types at crate root for convenience.
pub use models::audio_models::{AudioLevels, SampleFormat, StreamFormat, TransportDiagnostics};
pub use models::config::{Encoding, TransportConfiguration};
pub use models::device::{Device, DeviceCapabilities, DeviceCapability};
pub use models::error::TransportError;
pub use models::recording_result::{ExportResult, RecordingMetadata};
pub use models::state::{Command, TransitionEvent, TransportState};
pub use observer::{ChannelObserver, ObserverId, TransportEvent};
pub use processing::ring_buffer::RingBuffer;
pub use registry::{DeviceRegistry, StaticDeviceSource};
pub use session::{SessionInfo, Transport};
pub use traits::audio_backend::{AudioBackend, StreamCallback, StreamDirection, StreamErrorCallback};
pub use traits::device_source::DeviceSource;
pub use traits::transport_observer::TransportObserver;
