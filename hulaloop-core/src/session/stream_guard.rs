use crate::models::audio_models::StreamFormat;
use crate::models::device::Device;
use crate::models::error::TransportError;
use crate::traits::audio_backend::{
    AudioBackend, StreamCallback, StreamDirection, StreamErrorCallback,
};

/// An opened backend. Stops and closes it on every exit path.
///
/// [`into_inner`](Self::into_inner) releases the device and hands the
/// backend back for reuse; dropping the guard releases it too.
pub struct StreamGuard<B: AudioBackend> {
    backend: Option<B>,
    device: Device,
    direction: StreamDirection,
    started: bool,
}

impl<B: AudioBackend> StreamGuard<B> {
    /// Open `device` on `backend`. On failure the backend is returned along
    /// with the error so the caller can keep it.
    pub fn open(
        mut backend: B,
        device: &Device,
        format: StreamFormat,
        direction: StreamDirection,
    ) -> Result<Self, (B, TransportError)> {
        if let Err(e) = backend.open(device, format, direction) {
            backend.close();
            return Err((backend, e));
        }
        log::info!(
            "Opened {} ({:?}, {} Hz)",
            device.label(),
            direction,
            format.sample_rate
        );
        Ok(Self {
            backend: Some(backend),
            device: device.clone(),
            direction,
            started: false,
        })
    }

    pub fn start(
        &mut self,
        callback: StreamCallback,
        on_error: StreamErrorCallback,
    ) -> Result<(), TransportError> {
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| TransportError::StreamFailed("stream already released".into()))?;
        backend.start(callback, on_error)?;
        self.started = true;
        Ok(())
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn direction(&self) -> StreamDirection {
        self.direction
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Stop, close and return the backend.
    pub fn into_inner(mut self) -> Option<B> {
        self.release();
        self.backend.take()
    }

    fn release(&mut self) {
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        if self.started {
            if let Err(e) = backend.stop() {
                log::warn!("Failed to stop stream on {}: {}", self.device.label(), e);
            }
            self.started = false;
        }
        if backend.is_open() {
            backend.close();
            log::info!("Closed {}", self.device.label());
        }
    }
}

impl<B: AudioBackend> Drop for StreamGuard<B> {
    fn drop(&mut self) {
        self.release();
    }
}
