//! # hulaloop-windows
//!
//! Windows WASAPI backend for the HulaLoop transport.
//!
//! Provides:
//! - `WasapiBackend`: [`AudioBackend`](hulaloop_core::AudioBackend) over
//!   WASAPI shared mode: microphone capture, render-endpoint loopback and playback
//! - `WasapiDeviceSource`: endpoint enumeration via the MMDevice API
//! - `permissions`: Windows microphone privacy check
//!
//! ## Platform Requirements
//! - Windows 10 1703+ (build 15063)
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use hulaloop_core::{Transport, TransportConfiguration};
//! use hulaloop_windows::{WasapiBackend, WasapiDeviceSource};
//!
//! let transport = Transport::new(
//!     WasapiBackend::new(),
//!     Box::new(WasapiDeviceSource::new()),
//!     TransportConfiguration::default(),
//! )?;
//! transport.set_input_device("Speakers")?; // loopback
//! transport.record()?;
//! ```

pub mod error;
pub mod format;

#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod permissions;
#[cfg(target_os = "windows")]
pub mod wasapi_backend;

pub use error::WasapiError;
pub use format::MixFormat;

#[cfg(target_os = "windows")]
pub use device_enumerator::WasapiDeviceSource;
#[cfg(target_os = "windows")]
pub use wasapi_backend::WasapiBackend;
