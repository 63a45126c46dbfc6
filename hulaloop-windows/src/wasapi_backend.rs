//! WASAPI shared-mode streaming for record, loopback and render endpoints.
//!
//! Each started stream runs on a dedicated thread registered with MMCSS
//! ("Pro Audio"). COM objects never leave that thread. Shared mode
//! delivers Float32 at the endpoint's mix format, which is why `open`
//! accepts only formats matching it.

use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use windows::core::PCWSTR;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Threading::{
    AvRevertMmThreadCharacteristics, AvSetMmThreadCharacteristicsW,
};

use hulaloop_core::models::audio_models::StreamFormat;
use hulaloop_core::models::device::{Device, DeviceCapability};
use hulaloop_core::models::error::TransportError;
use hulaloop_core::traits::audio_backend::{
    AudioBackend, AudioBufferCallback, RenderCallback, StreamCallback, StreamDirection,
    StreamErrorCallback,
};

use crate::com::{self, ComGuard, MixFormatPtr};
use crate::error::WasapiError;

/// Shared-mode buffer length, in 100 ns units (100 ms).
const BUFFER_DURATION_HNS: i64 = 1_000_000;

/// Wake-up period of the stream loops.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Stream handshake: `Ok` once the client started, or the setup error.
type Ready = Sender<Result<(), WasapiError>>;

#[derive(Debug, Clone)]
struct OpenStream {
    device: Device,
    format: StreamFormat,
    direction: StreamDirection,
}

/// [`AudioBackend`] over WASAPI shared mode.
///
/// `Capture` opens a capture endpoint, `Loopback` captures the mix of a
/// render endpoint (`AUDCLNT_STREAMFLAGS_LOOPBACK`), and `Render` plays to a
/// render endpoint.
pub struct WasapiBackend {
    open: Option<OpenStream>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl WasapiBackend {
    pub fn new() -> Self {
        Self {
            open: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl Default for WasapiBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for WasapiBackend {
    fn open(
        &mut self,
        device: &Device,
        format: StreamFormat,
        direction: StreamDirection,
    ) -> Result<(), TransportError> {
        self.close();

        let required = match direction {
            StreamDirection::Capture => DeviceCapability::Record,
            StreamDirection::Loopback => DeviceCapability::Loopback,
            StreamDirection::Render => DeviceCapability::Output,
        };
        if !device.supports(required) {
            return Err(TransportError::DeviceOpenFailed(format!(
                "{} cannot be opened for {:?}",
                device.label(),
                direction
            )));
        }

        let id = device.id.clone();
        let mix = com::run_in_mta(move || unsafe {
            let client = com::activate(&id)?;
            Ok(MixFormatPtr::of(&client)?.describe())
        })
        .and_then(|mix| mix.check(&format).map(|()| mix))
        .map_err(|e| match e {
            WasapiError::DeviceNotFound(_) => TransportError::from(e),
            other => TransportError::DeviceOpenFailed(other.to_string()),
        })?;

        log::info!("Opened {} for {:?} ({})", device.label(), direction, mix);
        self.open = Some(OpenStream {
            device: device.clone(),
            format,
            direction,
        });
        Ok(())
    }

    fn start(
        &mut self,
        callback: StreamCallback,
        on_error: StreamErrorCallback,
    ) -> Result<(), TransportError> {
        let stream = self
            .open
            .clone()
            .ok_or_else(|| TransportError::StreamFailed("device is not open".into()))?;
        if self.worker.is_some() {
            return Err(TransportError::StreamFailed(
                "stream already running".into(),
            ));
        }
        let matches_direction = matches!(
            (&callback, stream.direction),
            (StreamCallback::Capture(_), StreamDirection::Capture | StreamDirection::Loopback)
                | (StreamCallback::Render(_), StreamDirection::Render)
        );
        if !matches_direction {
            return Err(TransportError::StreamFailed(format!(
                "callback does not match a {:?} stream",
                stream.direction
            )));
        }

        let thread_name = match stream.direction {
            StreamDirection::Capture => "wasapi-capture",
            StreamDirection::Loopback => "wasapi-loopback",
            StreamDirection::Render => "wasapi-render",
        };
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);

        let handle = thread::Builder::new()
            .name(thread_name.into())
            .spawn(move || {
                let mut ready = Some(ready_tx);
                let result = stream_thread(&stream, &running, callback, &mut ready);
                running.store(false, Ordering::SeqCst);
                if let Err(e) = result {
                    match ready.take() {
                        Some(ready) => {
                            let _ = ready.send(Err(e));
                        }
                        None => {
                            log::error!("Stream on {} failed: {}", stream.device.label(), e);
                            on_error(e.into());
                        }
                    }
                }
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                TransportError::StreamFailed(format!("failed to spawn stream thread: {}", e))
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e.into())
            }
            Err(_) => {
                let _ = handle.join();
                Err(TransportError::StreamFailed(
                    "stream thread exited during startup".into(),
                ))
            }
        }
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("Stream thread panicked");
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        let _ = self.stop();
        if let Some(stream) = self.open.take() {
            log::debug!("Closed {}", stream.device.label());
        }
    }

    fn is_open(&self) -> bool {
        self.open.is_some()
    }
}

impl Drop for WasapiBackend {
    fn drop(&mut self) {
        self.close();
    }
}

/// Body of the stream thread.
///
/// Sequence: CoInitializeEx (MTA), activate the endpoint, initialize in
/// shared mode (with the loopback flag for `Loopback`), register with
/// MMCSS, then hand off to the capture or render loop.
fn stream_thread(
    stream: &OpenStream,
    running: &AtomicBool,
    callback: StreamCallback,
    ready: &mut Option<Ready>,
) -> Result<(), WasapiError> {
    let _com = ComGuard::init_mta()?;
    unsafe {
        let client = com::activate(&stream.device.id)?;
        let mix = MixFormatPtr::of(&client)?;
        mix.describe().check(&stream.format)?;
        let channels = stream.format.channels as usize;

        let flags = match stream.direction {
            StreamDirection::Loopback => {
                AUDCLNT_STREAMFLAGS_LOOPBACK | AUDCLNT_STREAMFLAGS_NOPERSIST
            }
            _ => AUDCLNT_STREAMFLAGS_NOPERSIST,
        };
        client
            .Initialize(
                AUDCLNT_SHAREMODE_SHARED,
                flags,
                BUFFER_DURATION_HNS,
                0,
                mix.as_ptr(),
                None,
            )
            .map_err(|e| WasapiError::Com(format!("IAudioClient::Initialize failed: {}", e)))?;

        let _mmcss = MmcssGuard::register();
        let result = match callback {
            StreamCallback::Capture(callback) => {
                capture_loop(&client, channels, running, callback, ready)
            }
            StreamCallback::Render(callback) => {
                render_loop(&client, channels, running, callback, ready)
            }
        };
        let _ = client.Stop();
        result
    }
}

unsafe fn capture_loop(
    client: &IAudioClient,
    channels: usize,
    running: &AtomicBool,
    mut callback: AudioBufferCallback,
    ready: &mut Option<Ready>,
) -> Result<(), WasapiError> {
    let capture: IAudioCaptureClient = client
        .GetService()
        .map_err(|e| WasapiError::Com(format!("GetService failed: {}", e)))?;
    client
        .Start()
        .map_err(|e| WasapiError::Com(format!("IAudioClient::Start failed: {}", e)))?;
    signal_ready(ready);

    let mut silence = Vec::new();
    while running.load(Ordering::SeqCst) {
        thread::sleep(POLL_INTERVAL);

        let mut packet_length = capture
            .GetNextPacketSize()
            .map_err(stream_error("GetNextPacketSize"))?;
        while packet_length > 0 {
            let mut data: *mut u8 = ptr::null_mut();
            let mut frames: u32 = 0;
            let mut flags: u32 = 0;
            capture
                .GetBuffer(&mut data, &mut frames, &mut flags, None, None)
                .map_err(stream_error("GetBuffer"))?;

            if frames > 0 && !data.is_null() {
                let len = frames as usize * channels;
                if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                    silence.clear();
                    silence.resize(len, 0.0f32);
                    callback(&silence);
                } else {
                    callback(std::slice::from_raw_parts(data as *const f32, len));
                }
            }

            capture
                .ReleaseBuffer(frames)
                .map_err(stream_error("ReleaseBuffer"))?;
            packet_length = capture
                .GetNextPacketSize()
                .map_err(stream_error("GetNextPacketSize"))?;
        }
    }
    Ok(())
}

unsafe fn render_loop(
    client: &IAudioClient,
    channels: usize,
    running: &AtomicBool,
    mut callback: RenderCallback,
    ready: &mut Option<Ready>,
) -> Result<(), WasapiError> {
    let render: IAudioRenderClient = client
        .GetService()
        .map_err(|e| WasapiError::Com(format!("GetService failed: {}", e)))?;
    let buffer_frames = client
        .GetBufferSize()
        .map_err(|e| WasapiError::Com(format!("GetBufferSize failed: {}", e)))?;

    // Prime the endpoint buffer so the first period is not a glitch.
    fill(&render, buffer_frames, channels, &mut callback)?;
    client
        .Start()
        .map_err(|e| WasapiError::Com(format!("IAudioClient::Start failed: {}", e)))?;
    signal_ready(ready);

    while running.load(Ordering::SeqCst) {
        thread::sleep(POLL_INTERVAL);
        let padding = client
            .GetCurrentPadding()
            .map_err(stream_error("GetCurrentPadding"))?;
        let available = buffer_frames.saturating_sub(padding);
        if available > 0 {
            fill(&render, available, channels, &mut callback)?;
        }
    }
    Ok(())
}

unsafe fn fill(
    render: &IAudioRenderClient,
    frames: u32,
    channels: usize,
    callback: &mut RenderCallback,
) -> Result<(), WasapiError> {
    let data = render.GetBuffer(frames).map_err(stream_error("GetBuffer"))?;
    let buffer = std::slice::from_raw_parts_mut(data as *mut f32, frames as usize * channels);
    callback(buffer);
    render
        .ReleaseBuffer(frames, 0)
        .map_err(stream_error("ReleaseBuffer"))
}

fn signal_ready(ready: &mut Option<Ready>) {
    if let Some(ready) = ready.take() {
        let _ = ready.send(Ok(()));
    }
}

fn stream_error(call: &'static str) -> impl Fn(windows::core::Error) -> WasapiError {
    move |e| {
        if e.code() == AUDCLNT_E_DEVICE_INVALIDATED {
            WasapiError::Stream("device was removed".into())
        } else {
            WasapiError::Stream(format!("{} failed: {}", call, e))
        }
    }
}

/// MMCSS registration of the current thread, reverted on drop.
struct MmcssGuard(Option<HANDLE>);

impl MmcssGuard {
    unsafe fn register() -> Self {
        let mut task_index: u32 = 0;
        let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
        match AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index) {
            Ok(handle) => Self(Some(handle)),
            Err(e) => {
                log::warn!("MMCSS registration failed: {}", e);
                Self(None)
            }
        }
    }
}

impl Drop for MmcssGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            unsafe {
                let _ = AvRevertMmThreadCharacteristics(handle);
            }
        }
    }
}
