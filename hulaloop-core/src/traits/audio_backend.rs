use std::sync::Arc;

use crate::models::audio_models::StreamFormat;
use crate::models::device::Device;
use crate::models::error::TransportError;

/// Callback invoked with captured frames (`readFrames`).
///
/// `samples` holds whole interleaved frames in the format the stream was
/// opened with. Runs on the backend's realtime thread: it must return
/// promptly and never block.
pub type AudioBufferCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Callback invoked to fill an output buffer (`writeFrames`).
///
/// The callback writes interleaved frames into `buffer` and must fill every
/// slot (silence where no audio is available). Same realtime rules as
/// [`AudioBufferCallback`].
pub type RenderCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Callback invoked once when the stream fails irrecoverably (device
/// unplugged, driver error). May run on the realtime thread; receivers must
/// hand the work off instead of tearing the stream down inline.
pub type StreamErrorCallback = Arc<dyn Fn(TransportError) + Send + Sync + 'static>;

/// How a device is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamDirection {
    /// Capture from a record endpoint.
    Capture,
    /// Capture the mix rendered to an output endpoint.
    Loopback,
    /// Render to an output endpoint.
    Render,
}

/// Frame callback handed to [`AudioBackend::start`].
pub enum StreamCallback {
    Capture(AudioBufferCallback),
    Render(RenderCallback),
}

/// Interface for platform-specific audio backends.
///
/// Implemented by:
/// - `WasapiBackend` (Windows)
/// - test fakes
///
/// Lifecycle: `open` → `start` → `stop` → `close`. `stop` and `close` must be
/// safe to call in any order and repeatedly; `close` releases the hardware
/// handle. Implementations should also close on drop.
pub trait AudioBackend: Send + 'static {
    /// Claim `device` with the requested format.
    ///
    /// Fails with [`TransportError::DeviceOpenFailed`] when the device
    /// rejects the format. Implementations never substitute another format.
    fn open(
        &mut self,
        device: &Device,
        format: StreamFormat,
        direction: StreamDirection,
    ) -> Result<(), TransportError>;

    /// Begin delivering frames on a dedicated realtime thread.
    fn start(
        &mut self,
        callback: StreamCallback,
        on_error: StreamErrorCallback,
    ) -> Result<(), TransportError>;

    /// Stop frame delivery. The callback is not invoked after this returns.
    fn stop(&mut self) -> Result<(), TransportError>;

    /// Release the device.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}
