//! Test doubles: a scriptable backend and an event-recording observer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::audio_models::{AudioLevels, StreamFormat};
use crate::models::device::{Device, DeviceCapabilities};
use crate::models::error::TransportError;
use crate::models::recording_result::ExportResult;
use crate::models::state::{TransitionEvent, TransportState};
use crate::traits::audio_backend::{
    AudioBackend, AudioBufferCallback, RenderCallback, StreamCallback, StreamDirection,
    StreamErrorCallback,
};
use crate::traits::transport_observer::TransportObserver;

#[derive(Default)]
struct FakeState {
    opened: Option<(Device, StreamFormat, StreamDirection)>,
    started: bool,
    capture: Option<AudioBufferCallback>,
    render: Option<RenderCallback>,
    on_error: Option<StreamErrorCallback>,
    reject_open: Option<String>,
    open_count: usize,
    close_count: usize,
}

/// Backend that never touches hardware. Frames are pushed and pulled by the
/// test through a [`FakeBackendHandle`].
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

/// Test-side view of a [`FakeBackend`].
#[derive(Clone)]
pub struct FakeBackendHandle {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn new() -> (Self, FakeBackendHandle) {
        let state = Arc::new(Mutex::new(FakeState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            FakeBackendHandle { state },
        )
    }
}

impl AudioBackend for FakeBackend {
    fn open(
        &mut self,
        device: &Device,
        format: StreamFormat,
        direction: StreamDirection,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if let Some(reason) = state.reject_open.clone() {
            return Err(TransportError::DeviceOpenFailed(reason));
        }
        state.opened = Some((device.clone(), format, direction));
        state.open_count += 1;
        Ok(())
    }

    fn start(
        &mut self,
        callback: StreamCallback,
        on_error: StreamErrorCallback,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.opened.is_none() {
            return Err(TransportError::StreamFailed("not open".into()));
        }
        match callback {
            StreamCallback::Capture(cb) => state.capture = Some(cb),
            StreamCallback::Render(cb) => state.render = Some(cb),
        }
        state.on_error = Some(on_error);
        state.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.started = false;
        state.capture = None;
        state.render = None;
        state.on_error = None;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        if state.opened.take().is_some() {
            state.close_count += 1;
        }
        state.started = false;
        state.capture = None;
        state.render = None;
        state.on_error = None;
    }

    fn is_open(&self) -> bool {
        self.state.lock().opened.is_some()
    }
}

impl FakeBackendHandle {
    /// Deliver captured samples. Returns `false` if no capture stream runs.
    pub fn feed(&self, samples: &[f32]) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.capture.as_mut() {
            Some(callback) if state.started => {
                callback(samples);
                true
            }
            _ => false,
        }
    }

    /// Pull `frames` frames from the render stream, if one runs.
    pub fn pull(&self, frames: usize) -> Option<Vec<f32>> {
        let mut state = self.state.lock();
        let channels = state.opened.as_ref().map(|(_, f, _)| f.channels as usize)?;
        if !state.started {
            return None;
        }
        let callback = state.render.as_mut()?;
        let mut buffer = vec![f32::NAN; frames * channels];
        callback(&mut buffer);
        Some(buffer)
    }

    /// Report a fatal stream error through the backend's error callback.
    pub fn fail(&self, error: TransportError) {
        let on_error = self.state.lock().on_error.clone();
        if let Some(on_error) = on_error {
            on_error(error);
        }
    }

    /// Make subsequent opens fail with `DeviceOpenFailed(reason)`.
    pub fn reject_open(&self, reason: &str) {
        self.state.lock().reject_open = Some(reason.to_string());
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().opened.is_some()
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    pub fn opened(&self) -> Option<(Device, StreamFormat, StreamDirection)> {
        self.state.lock().opened.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }
}

/// Devices used across transport tests.
pub fn test_devices() -> Vec<Device> {
    let speakers = DeviceCapabilities::LOOPBACK | DeviceCapabilities::OUTPUT;
    vec![
        Device::new("mic-1", "Built-in Microphone", DeviceCapabilities::RECORD).as_default(),
        Device::new("spk-1", "Speakers", speakers).as_default(),
        Device::new("usb-in", "USB Headset", DeviceCapabilities::RECORD),
        Device::new("usb-out", "USB Headset", DeviceCapabilities::OUTPUT),
    ]
}

/// Everything an observer was told, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Transition(TransportState, TransportState),
    Countdown,
    CountdownCancelled,
    Levels,
    Error(TransportError),
    Exported(ExportResult),
}

#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<Recorded>>,
    pub transitions: Mutex<Vec<TransitionEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// State-change pairs, ignoring every other notification.
    pub fn transitions(&self) -> Vec<(TransportState, TransportState)> {
        self.transitions
            .lock()
            .iter()
            .map(|e| (e.from, e.to))
            .collect()
    }

    pub fn errors(&self) -> Vec<TransportError> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Recorded::Error(error) => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Recorded) -> usize {
        self.events.lock().iter().filter(|e| *e == wanted).count()
    }
}

impl TransportObserver for RecordingObserver {
    fn on_state_changed(&self, event: &TransitionEvent) {
        self.transitions.lock().push(*event);
        let recorded = Recorded::Transition(event.from, event.to);
        self.events.lock().push(recorded);
    }

    fn on_countdown(&self, _remaining: Duration) {
        self.events.lock().push(Recorded::Countdown);
    }

    fn on_countdown_cancelled(&self) {
        self.events.lock().push(Recorded::CountdownCancelled);
    }

    fn on_levels_updated(&self, _levels: &AudioLevels, _elapsed: Duration) {
        self.events.lock().push(Recorded::Levels);
    }

    fn on_error(&self, error: &TransportError) {
        self.events.lock().push(Recorded::Error(error.clone()));
    }

    fn on_export_finished(&self, result: &ExportResult) {
        self.events.lock().push(Recorded::Exported(result.clone()));
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
