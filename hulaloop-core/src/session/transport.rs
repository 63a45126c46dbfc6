use std::fs::{self, File};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use parking_lot::{Mutex, ReentrantMutex, RwLock};

use super::pump::{CapturePump, PlaybackFeeder, StreamCounters};
use super::recording::{Session, SessionInfo};
use super::scheduler::{ActiveClock, Countdown, Ticker, TimerToken};
use super::stream_guard::StreamGuard;
use crate::models::audio_models::{AudioLevels, StreamFormat, TransportDiagnostics};
use crate::models::config::{Encoding, TransportConfiguration};
use crate::models::device::{Device, DeviceCapabilities, DeviceCapability};
use crate::models::error::TransportError;
use crate::models::recording_result::{ExportResult, RecordingMetadata};
use crate::models::state::{Command, TransitionEvent, TransportState};
use crate::observer::ObserverId;
use crate::processing::levels::LevelMeter;
use crate::processing::ring_buffer::{FrameConsumer, FrameProducer, RingBuffer};
use crate::processing::wav_format;
use crate::registry::DeviceRegistry;
use crate::storage::wav_writer::WavFileWriter;
use crate::storage::{export, metadata};
use crate::traits::audio_backend::{
    AudioBackend, StreamCallback, StreamDirection, StreamErrorCallback,
};
use crate::traits::device_source::DeviceSource;
use crate::traits::transport_observer::TransportObserver;

/// Period of level/countdown notifications.
const METER_INTERVAL: Duration = Duration::from_millis(250);

/// A record command waiting out its delay, with the device already open.
struct PendingRecord<B: AudioBackend> {
    guard: StreamGuard<B>,
    countdown: Countdown,
}

/// Mutable transport state. Never locked while observers run.
///
/// Fields drop in declaration order: the stream stops before the pumps
/// finish, and the pumps finish before the session file is removed.
struct Core<B: AudioBackend> {
    stream: Option<StreamGuard<B>>,
    pending: Option<PendingRecord<B>>,
    pump: Option<CapturePump>,
    feeder: Option<PlaybackFeeder>,
    duration_timer: Option<Countdown>,
    ticker: Option<Ticker>,
    session: Option<Session>,
    backend: Option<B>,
    state: TransportState,
    /// Recording or Playing while paused.
    paused_from: Option<TransportState>,
    config: TransportConfiguration,
    input_device: Option<Device>,
    output_device: Option<Device>,
    clock: ActiveClock,
    /// Bumped per stream start; stale fault and end-of-playback handlers compare against it.
    generation: u64,
}

struct Shared<B: AudioBackend> {
    commands: ReentrantMutex<()>,
    core: Mutex<Core<B>>,
    registry: Mutex<DeviceRegistry>,
    observers: RwLock<Vec<(ObserverId, Arc<dyn TransportObserver>)>>,
    next_observer_id: AtomicU64,
    armed: Arc<AtomicBool>,
    meter: Arc<LevelMeter>,
    counters: Arc<StreamCounters>,
    created: Instant,
}

/// The record/playback transport.
///
/// Owns one audio backend (reopened per stream), the device registry and
/// the current session. Cloning yields another handle to the same
/// transport.
///
/// ```text
///  record ─▶ [backend capture] ─▶ ring ─▶ capture pump ─▶ session.wav
///  playback ◀─ [backend render] ◀─ ring ◀─ playback feeder ◀─┘
///  export:   session.wav ─▶ encoder ─▶ .partial ─▶ rename ─▶ target
/// ```
///
/// Commands are serialized by a re-entrant lock, so an observer may call
/// back into the transport (for example `stop()` from `on_state_changed`).
/// Timer, fault and end-of-playback handlers take the same lock.
pub struct Transport<B: AudioBackend> {
    shared: Arc<Shared<B>>,
}

impl<B: AudioBackend> Clone for Transport<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: AudioBackend> Transport<B> {
    /// Create a transport in the Ready state.
    ///
    /// Fails with `ConfigurationFailed` for an invalid configuration and
    /// `UnsupportedEncoding` when the configured encoding is not compiled in.
    pub fn new(
        backend: B,
        source: Box<dyn DeviceSource>,
        config: TransportConfiguration,
    ) -> Result<Self, TransportError> {
        config
            .validate()
            .map_err(TransportError::ConfigurationFailed)?;
        config.encoding.ensure_available()?;

        let mut registry = DeviceRegistry::new(source);
        if let Err(e) = registry.list() {
            log::warn!("Initial device enumeration failed: {}", e);
        }

        let shared = Arc::new(Shared {
            commands: ReentrantMutex::new(()),
            core: Mutex::new(Core {
                stream: None,
                pending: None,
                pump: None,
                feeder: None,
                duration_timer: None,
                ticker: None,
                session: None,
                backend: Some(backend),
                state: TransportState::Ready,
                paused_from: None,
                config,
                input_device: None,
                output_device: None,
                clock: ActiveClock::default(),
                generation: 0,
            }),
            registry: Mutex::new(registry),
            observers: RwLock::new(Vec::new()),
            next_observer_id: AtomicU64::new(1),
            armed: Arc::new(AtomicBool::new(false)),
            meter: Arc::new(LevelMeter::new()),
            counters: Arc::new(StreamCounters::default()),
            created: Instant::now(),
        });

        let weak = Arc::downgrade(&shared);
        let mut reported_overruns = 0u64;
        let ticker = Ticker::start("transport-meter", METER_INTERVAL, move |token| {
            let Some(shared) = weak.upgrade() else {
                return false;
            };
            shared.on_meter_tick(token, &mut reported_overruns);
            true
        })?;
        shared.core.lock().ticker = Some(ticker);

        Ok(Self { shared })
    }

    // --- Commands ---

    /// Start recording from the selected (or default) input device.
    ///
    /// With a delay configured the device is opened now and the transport
    /// stays Ready until the countdown expires. From Paused (after
    /// recording) this resumes.
    pub fn record(&self) -> Result<(), TransportError> {
        self.shared.record()
    }

    /// Set the delay and duration window, then [`record`](Self::record).
    pub fn record_with(
        &self,
        delay: Duration,
        duration: Option<Duration>,
    ) -> Result<(), TransportError> {
        let _commands = self.shared.commands.lock();
        self.set_delay(delay);
        self.set_duration(duration)?;
        self.shared.record()
    }

    pub fn pause(&self) -> Result<(), TransportError> {
        self.shared.pause()
    }

    pub fn resume(&self) -> Result<(), TransportError> {
        self.shared.resume(Command::Resume, None)
    }

    /// Stop recording or playback. Idempotent in Stopped; cancels a pending
    /// countdown in Ready.
    pub fn stop(&self) -> Result<(), TransportError> {
        self.shared.stop()
    }

    /// Play the session through the selected (or default) output device.
    pub fn playback(&self) -> Result<(), TransportError> {
        self.shared.playback()
    }

    /// Write the session to `path` (a file, or a directory to receive a
    /// timestamped file) in the selected encoding.
    pub fn export(&self, path: impl AsRef<Path>) -> Result<ExportResult, TransportError> {
        self.shared.export(path.as_ref())
    }

    /// Drop the session and its temporary file. `confirmed` must be true.
    pub fn discard(&self, confirmed: bool) -> Result<(), TransportError> {
        self.shared.discard(confirmed)
    }

    pub fn set_input_device(&self, query: &str) -> Result<Device, TransportError> {
        self.shared
            .select_device(query, Command::SetInputDevice, DeviceCapabilities::INPUT)
    }

    pub fn set_output_device(&self, query: &str) -> Result<Device, TransportError> {
        self.shared
            .select_device(query, Command::SetOutputDevice, DeviceCapabilities::OUTPUT)
    }

    /// Countdown before the next recording starts.
    pub fn set_delay(&self, delay: Duration) {
        let _commands = self.shared.commands.lock();
        self.shared.core.lock().config.delay = delay;
    }

    /// Limit on active recording/playback time. Applies immediately to a
    /// running stream; a limit already exceeded stops it.
    pub fn set_duration(&self, duration: Option<Duration>) -> Result<(), TransportError> {
        self.shared.set_duration(duration)
    }

    pub fn set_sample_rate(&self, sample_rate: u32) -> Result<(), TransportError> {
        self.shared.set_sample_rate(sample_rate)
    }

    pub fn set_encoding(&self, encoding: Encoding) -> Result<(), TransportError> {
        encoding.ensure_available()?;
        let _commands = self.shared.commands.lock();
        let mut core = self.shared.core.lock();
        core.config.encoding = encoding;
        if let Some(session) = core.session.as_mut() {
            session.info.encoding = encoding;
        }
        Ok(())
    }

    // --- Queries ---

    pub fn current_state(&self) -> TransportState {
        self.shared.core.lock().state
    }

    /// Re-enumerate devices.
    pub fn list_devices(&self) -> Result<Vec<Device>, TransportError> {
        self.shared.registry.lock().list()
    }

    pub fn list_devices_by_capability(
        &self,
        capabilities: DeviceCapabilities,
    ) -> Result<Vec<Device>, TransportError> {
        self.shared.registry.lock().list_by_capability(capabilities)
    }

    pub fn selected_input_device(&self) -> Option<Device> {
        self.shared.core.lock().input_device.clone()
    }

    pub fn selected_output_device(&self) -> Option<Device> {
        self.shared.core.lock().output_device.clone()
    }

    pub fn configuration(&self) -> TransportConfiguration {
        self.shared.core.lock().config.clone()
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        let core = self.shared.core.lock();
        core.session.as_ref().map(|s| s.info.clone())
    }

    /// Active time of the current recording or playback.
    pub fn elapsed(&self) -> Duration {
        self.shared.core.lock().clock.elapsed()
    }

    /// Time left on a pending record countdown.
    pub fn countdown_remaining(&self) -> Option<Duration> {
        self.shared
            .core
            .lock()
            .pending
            .as_ref()
            .map(|p| p.countdown.remaining())
    }

    pub fn current_levels(&self) -> AudioLevels {
        self.shared.meter.snapshot()
    }

    pub fn diagnostics(&self) -> TransportDiagnostics {
        self.shared.counters.snapshot()
    }

    // --- Observers ---

    pub fn add_observer(&self, observer: Arc<dyn TransportObserver>) -> ObserverId {
        let next = &self.shared.next_observer_id;
        let id = ObserverId(next.fetch_add(1, Ordering::Relaxed));
        self.shared.observers.write().push((id, observer));
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.shared.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }
}

impl<B: AudioBackend> Shared<B> {
    fn record(self: &Arc<Self>) -> Result<(), TransportError> {
        let _commands = self.commands.lock();
        let (selected, format, delay) = {
            let core = self.core.lock();
            match (core.state, core.paused_from) {
                (TransportState::Paused, Some(TransportState::Recording)) => {
                    drop(core);
                    return self.resume(Command::Record, Some(TransportState::Recording));
                }
                (TransportState::Ready, _) if core.pending.is_none() => {}
                (state, _) => return Err(TransportError::invalid(Command::Record, state)),
            }
            (
                core.input_device.clone(),
                core.config.stream_format(),
                core.config.delay,
            )
        };

        let fallback = [DeviceCapability::Record, DeviceCapability::Loopback];
        let device = self.stream_device(selected, &fallback)?;
        let direction = if device.supports(DeviceCapability::Record) {
            StreamDirection::Capture
        } else {
            StreamDirection::Loopback
        };

        let mut core = self.core.lock();
        let guard = self.open_stream(&mut core, &device, format, direction)?;

        if delay.is_zero() {
            let event = self.begin_recording(&mut core, guard)?;
            drop(core);
            self.emit_transition(&event);
            return Ok(());
        }

        let weak = Arc::downgrade(self);
        let countdown = match Countdown::start("record-delay", delay, move |token| {
            if let Some(shared) = weak.upgrade() {
                shared.on_delay_elapsed(&token);
            }
        }) {
            Ok(countdown) => countdown,
            Err(e) => {
                core.backend = guard.into_inner();
                return Err(e);
            }
        };
        core.pending = Some(PendingRecord { guard, countdown });
        drop(core);

        log::info!("Recording starts in {:.1}s", delay.as_secs_f64());
        self.notify(|o| o.on_countdown(delay));
        Ok(())
    }

    fn open_stream(
        &self,
        core: &mut Core<B>,
        device: &Device,
        format: StreamFormat,
        direction: StreamDirection,
    ) -> Result<StreamGuard<B>, TransportError> {
        let backend = core
            .backend
            .take()
            .ok_or_else(|| TransportError::StreamFailed("audio backend is unavailable".into()))?;
        StreamGuard::open(backend, device, format, direction).map_err(|(backend, e)| {
            log::error!("Failed to open {}: {}", device.label(), e);
            core.backend = Some(backend);
            e
        })
    }

    /// Start capturing on an opened stream and enter Recording.
    fn begin_recording(
        self: &Arc<Self>,
        core: &mut Core<B>,
        mut guard: StreamGuard<B>,
    ) -> Result<TransitionEvent, TransportError> {
        let format = core.config.stream_format();
        let id = uuid::Uuid::new_v4().to_string();
        let temp_path = Session::temp_path_for(&core.config.temp_directory, &id);
        core.generation += 1;

        let ring = core.config.ring_buffer_frames();
        let generation = core.generation;
        let pump = match self.start_capture(&mut guard, format, ring, &temp_path, generation) {
            Ok(pump) => pump,
            Err(e) => {
                self.armed.store(false, Ordering::Release);
                core.backend = guard.into_inner();
                let _ = fs::remove_file(&temp_path);
                log::error!("Failed to start recording: {}", e);
                return Err(e);
            }
        };

        let info = SessionInfo {
            id,
            input_device: guard.device().clone(),
            output_device: core.output_device.clone(),
            format,
            encoding: core.config.encoding,
            delay: core.config.delay,
            max_duration: core.config.max_duration,
            frames: 0,
            recorded: Duration::ZERO,
            playback_position: 0,
            exported_to: None,
        };
        log::info!(
            "Recording session {} from {}",
            info.id,
            info.input_device.label()
        );
        core.session = Some(Session::new(info, temp_path));
        core.stream = Some(guard);
        core.pump = Some(pump);
        core.paused_from = None;
        core.clock.reset();
        core.clock.start();
        self.arm_duration_limit(core);
        Ok(self.commit(core, TransportState::Recording))
    }

    fn start_capture(
        self: &Arc<Self>,
        guard: &mut StreamGuard<B>,
        format: StreamFormat,
        ring_frames: usize,
        temp_path: &Path,
        generation: u64,
    ) -> Result<CapturePump, TransportError> {
        let writer = WavFileWriter::create(temp_path.to_path_buf(), format)?;
        let (producer, consumer) = RingBuffer::new(ring_frames, format.channels).split();
        self.counters.reset();
        self.meter.reset();
        let on_error = self.stream_error_callback(generation);
        let pump = CapturePump::spawn(
            consumer,
            writer,
            Arc::clone(&self.counters),
            Arc::clone(&on_error),
        )?;

        self.armed.store(true, Ordering::Release);
        guard.start(self.capture_callback(producer), on_error)?;
        Ok(pump)
    }

    fn capture_callback(&self, mut producer: FrameProducer) -> StreamCallback {
        let armed = Arc::clone(&self.armed);
        let meter = Arc::clone(&self.meter);
        let counters = Arc::clone(&self.counters);
        StreamCallback::Capture(Box::new(move |samples: &[f32]| {
            counters.capture_callbacks.fetch_add(1, Ordering::Relaxed);
            if !armed.load(Ordering::Acquire) {
                return;
            }
            meter.update(samples);
            let written = producer.push_frames(samples);
            counters
                .frames_captured
                .fetch_add(written as u64, Ordering::Relaxed);
        }))
    }

    fn render_callback(
        &self,
        mut consumer: FrameConsumer,
        source_done: Arc<AtomicBool>,
    ) -> StreamCallback {
        let armed = Arc::clone(&self.armed);
        let meter = Arc::clone(&self.meter);
        let counters = Arc::clone(&self.counters);
        StreamCallback::Render(Box::new(move |buffer: &mut [f32]| {
            counters.render_callbacks.fetch_add(1, Ordering::Relaxed);
            if !armed.load(Ordering::Acquire) {
                buffer.fill(0.0);
                return;
            }
            let channels = consumer.channels();
            let frames = consumer.pop_frames(buffer);
            let filled = frames * channels;
            buffer[filled..].fill(0.0);
            if frames > 0 {
                meter.update(&buffer[..filled]);
                counters
                    .frames_played
                    .fetch_add(frames as u64, Ordering::Relaxed);
            }
            let missing = (buffer.len() - filled) / channels;
            if missing > 0 && !source_done.load(Ordering::Acquire) {
                counters
                    .underrun_frames
                    .fetch_add(missing as u64, Ordering::Relaxed);
            }
        }))
    }

    /// Error callback for the stream started under `generation`, shared by
    /// the backend and the capture pump. Hands the first failure to a fresh
    /// thread so neither caller ever blocks on the command lock.
    fn stream_error_callback(self: &Arc<Self>, generation: u64) -> StreamErrorCallback {
        let weak = Arc::downgrade(self);
        let reported = Arc::new(AtomicBool::new(false));
        Arc::new(move |error: TransportError| {
            if reported.swap(true, Ordering::AcqRel) {
                return;
            }
            let weak: Weak<Self> = weak.clone();
            spawn_handler("transport-fault", move || {
                if let Some(shared) = weak.upgrade() {
                    shared.on_stream_failed(generation, error);
                }
            });
        })
    }

    fn pause(&self) -> Result<(), TransportError> {
        let _commands = self.commands.lock();
        let mut core = self.core.lock();
        let state = core.state;
        if !state.is_streaming() {
            return Err(TransportError::invalid(Command::Pause, state));
        }

        self.armed.store(false, Ordering::Release);
        core.duration_timer = None;
        core.clock.pause();
        core.paused_from = Some(state);
        let event = self.commit(&mut core, TransportState::Paused);
        drop(core);
        self.emit_transition(&event);
        Ok(())
    }

    /// Leave Paused for the state it was entered from. `required` restricts
    /// which origin the command may resume.
    fn resume(
        self: &Arc<Self>,
        command: Command,
        required: Option<TransportState>,
    ) -> Result<(), TransportError> {
        let _commands = self.commands.lock();
        let mut core = self.core.lock();
        let origin = match (core.state, core.paused_from) {
            (TransportState::Paused, Some(origin)) if required.is_none_or(|r| r == origin) => {
                origin
            }
            (state, _) => return Err(TransportError::invalid(command, state)),
        };

        core.clock.start();
        core.paused_from = None;
        self.armed.store(true, Ordering::Release);
        self.arm_duration_limit(&mut core);
        let event = self.commit(&mut core, origin);
        drop(core);
        self.emit_transition(&event);
        Ok(())
    }

    fn stop(&self) -> Result<(), TransportError> {
        let _commands = self.commands.lock();
        let mut core = self.core.lock();
        match (core.state, core.paused_from) {
            (TransportState::Ready, _) => {
                let Some(pending) = core.pending.take() else {
                    return Err(TransportError::invalid(Command::Stop, core.state));
                };
                pending.countdown.cancel();
                core.backend = pending.guard.into_inner();
                drop(core);
                log::info!("Record countdown cancelled");
                self.notify(|o| o.on_countdown_cancelled());
                Ok(())
            }
            (TransportState::Stopped, _) => Ok(()),
            (TransportState::Recording, _)
            | (TransportState::Paused, Some(TransportState::Recording)) => {
                drop(core);
                self.finish_recording();
                Ok(())
            }
            (TransportState::Playing, _)
            | (TransportState::Paused, Some(TransportState::Playing)) => {
                drop(core);
                self.finish_playback();
                Ok(())
            }
            (state, _) => Err(TransportError::invalid(Command::Stop, state)),
        }
    }

    /// Close the capture stream, drain and finalize the session file.
    fn finish_recording(&self) {
        let (guard, pump) = {
            let mut core = self.core.lock();
            self.armed.store(false, Ordering::Release);
            core.duration_timer = None;
            core.clock.pause();
            (core.stream.take(), core.pump.take())
        };

        // Stop the device first so nothing more is pushed, then drain.
        let backend = guard.and_then(StreamGuard::into_inner);
        let summary = pump.map(CapturePump::finish);

        let mut core = self.core.lock();
        if backend.is_some() {
            core.backend = backend;
        }
        let recorded = core.clock.elapsed();
        let mut failure = None;
        if let Some(session) = core.session.as_mut() {
            session.info.recorded = recorded;
            session.info.frames = match summary {
                Some(Ok(Some(summary))) => summary.frames,
                Some(Err(e)) => {
                    log::error!("Failed to finalize session file: {}", e);
                    failure = Some(e);
                    frames_on_disk(session.temp_path())
                }
                Some(Ok(None)) | None => frames_on_disk(session.temp_path()),
            };
            log::info!(
                "Recorded {} frames ({:.2}s active)",
                session.info.frames,
                recorded.as_secs_f64()
            );
        }
        core.paused_from = None;
        let event = self.commit(&mut core, TransportState::Stopped);
        drop(core);

        self.emit_transition(&event);
        if let Some(e) = failure {
            self.notify(|o| o.on_error(&e));
        }
    }

    fn playback(self: &Arc<Self>) -> Result<(), TransportError> {
        let _commands = self.commands.lock();
        let (selected, temp_path, format) = {
            let core = self.core.lock();
            match (core.state, core.paused_from) {
                (TransportState::Paused, Some(TransportState::Playing)) => {
                    drop(core);
                    return self.resume(Command::Playback, Some(TransportState::Playing));
                }
                (TransportState::Stopped, _) => {}
                (state, _) => return Err(TransportError::invalid(Command::Playback, state)),
            }
            match core.session.as_ref() {
                Some(session) if !session.info.is_empty() => (
                    core.output_device.clone(),
                    session.temp_path().to_path_buf(),
                    session.info.format,
                ),
                _ => return Err(TransportError::invalid(Command::Playback, core.state)),
            }
        };

        let device = self.stream_device(selected, &[DeviceCapability::Output])?;

        let mut core = self.core.lock();
        let mut guard = self.open_stream(&mut core, &device, format, StreamDirection::Render)?;
        core.generation += 1;
        let generation = core.generation;

        let ring = core.config.ring_buffer_frames();
        let feeder = match self.start_playback(&mut guard, &temp_path, format, ring, generation) {
            Ok(feeder) => feeder,
            Err(e) => {
                self.armed.store(false, Ordering::Release);
                core.backend = guard.into_inner();
                log::error!("Failed to start playback: {}", e);
                return Err(e);
            }
        };

        log::info!("Playing back through {}", device.label());
        if let Some(session) = core.session.as_mut() {
            session.info.output_device = Some(device);
            session.info.playback_position = 0;
        }
        core.stream = Some(guard);
        core.feeder = Some(feeder);
        core.clock.reset();
        core.clock.start();
        self.arm_duration_limit(&mut core);
        let event = self.commit(&mut core, TransportState::Playing);
        drop(core);
        self.emit_transition(&event);
        Ok(())
    }

    fn start_playback(
        self: &Arc<Self>,
        guard: &mut StreamGuard<B>,
        temp_path: &Path,
        format: StreamFormat,
        ring_frames: usize,
        generation: u64,
    ) -> Result<PlaybackFeeder, TransportError> {
        let (producer, consumer) = RingBuffer::new(ring_frames, format.channels).split();
        self.counters.reset();
        self.meter.reset();

        let weak = Arc::downgrade(self);
        let feeder = PlaybackFeeder::spawn(temp_path, producer, move || {
            spawn_handler("playback-finished", move || {
                if let Some(shared) = weak.upgrade() {
                    shared.on_playback_finished(generation);
                }
            });
        })?;

        self.armed.store(true, Ordering::Release);
        guard.start(
            self.render_callback(consumer, feeder.source_done()),
            self.stream_error_callback(generation),
        )?;
        Ok(feeder)
    }

    fn finish_playback(&self) {
        let (guard, feeder) = {
            let mut core = self.core.lock();
            self.armed.store(false, Ordering::Release);
            core.duration_timer = None;
            core.clock.pause();
            (core.stream.take(), core.feeder.take())
        };

        let backend = guard.and_then(StreamGuard::into_inner);
        if let Some(feeder) = feeder {
            feeder.stop();
        }

        let mut core = self.core.lock();
        if backend.is_some() {
            core.backend = backend;
        }
        let played = self.counters.frames_played.load(Ordering::Relaxed);
        if let Some(session) = core.session.as_mut() {
            session.info.playback_position = played;
        }
        core.paused_from = None;
        let event = self.commit(&mut core, TransportState::Stopped);
        drop(core);
        log::info!("Playback stopped after {} frames", played);
        self.emit_transition(&event);
    }

    fn export(&self, path: &Path) -> Result<ExportResult, TransportError> {
        let _commands = self.commands.lock();
        let (temp_path, info, bitrate, write_sidecar) = {
            let core = self.core.lock();
            if core.state != TransportState::Stopped {
                return Err(TransportError::invalid(Command::Export, core.state));
            }
            match core.session.as_ref() {
                Some(session) if !session.info.is_empty() => (
                    session.temp_path().to_path_buf(),
                    session.info.clone(),
                    core.config.mp3_bitrate_kbps,
                    core.config.write_metadata,
                ),
                _ => return Err(TransportError::invalid(Command::Export, core.state)),
            }
        };

        let encoding = info.encoding;
        let target = export::resolve_target(path, encoding, Local::now());
        log::info!(
            "Exporting session {} as {} to {}",
            info.id,
            encoding,
            target.display()
        );
        let outcome = match export::export_session(&temp_path, &target, encoding, bitrate) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Export failed: {}", e);
                return Err(e);
            }
        };

        let duration_secs = info.duration_secs();
        let metadata = RecordingMetadata::new(
            &info.id,
            &info.format,
            encoding,
            duration_secs,
            &outcome.path.to_string_lossy(),
            &outcome.checksum,
            Some(info.input_device.name.clone()),
        );
        if write_sidecar {
            if let Err(e) = metadata::write_metadata(&metadata, &outcome.path) {
                log::warn!("Export written but metadata sidecar failed: {}", e);
            }
        }

        let result = ExportResult {
            file_path: outcome.path,
            encoding,
            duration_secs,
            frames: outcome.frames,
            bytes_written: outcome.bytes_written,
            metadata,
            checksum: outcome.checksum,
        };
        if let Some(session) = self.core.lock().session.as_mut() {
            session.info.exported_to = Some(result.file_path.clone());
        }
        self.notify(|o| o.on_export_finished(&result));
        Ok(result)
    }

    fn discard(&self, confirmed: bool) -> Result<(), TransportError> {
        if !confirmed {
            return Err(TransportError::ConfirmationRequired);
        }
        let _commands = self.commands.lock();
        let mut core = self.core.lock();
        if core.state != TransportState::Stopped {
            return Err(TransportError::invalid(Command::Discard, core.state));
        }

        let session = core.session.take();
        core.clock.reset();
        core.paused_from = None;
        let event = self.commit(&mut core, TransportState::Ready);
        drop(core);

        if let Some(session) = session {
            log::info!("Discarded session {}", session.info.id);
        }
        self.emit_transition(&event);
        Ok(())
    }

    fn select_device(
        &self,
        query: &str,
        command: Command,
        capabilities: DeviceCapabilities,
    ) -> Result<Device, TransportError> {
        let _commands = self.commands.lock();
        {
            let core = self.core.lock();
            if core.state.is_streaming() || core.pending.is_some() {
                return Err(TransportError::invalid(command, core.state));
            }
        }

        let device = {
            let mut registry = self.registry.lock();
            registry.list()?;
            registry.resolve_for(query, capabilities)?
        };

        let mut core = self.core.lock();
        if command == Command::SetInputDevice {
            core.input_device = Some(device.clone());
        } else {
            core.output_device = Some(device.clone());
        }
        log::info!("Selected {} for {}", device.label(), command);
        Ok(device)
    }

    /// Device for a new stream: the selection if still present after a
    /// fresh enumeration, else the default for the first capability that
    /// has one.
    fn stream_device(
        &self,
        selected: Option<Device>,
        fallback: &[DeviceCapability],
    ) -> Result<Device, TransportError> {
        let mut registry = self.registry.lock();
        registry.list()?;
        match selected {
            Some(device) if registry.contains(&device) => Ok(device),
            Some(device) => {
                log::warn!("Selected device {} is no longer present", device.label());
                Err(TransportError::DeviceNotFound(device.name))
            }
            None => {
                let message = format!("no default device for {:?}", fallback);
                fallback
                    .iter()
                    .find_map(|capability| registry.default_for(*capability))
                    .ok_or(TransportError::DeviceNotFound(message))
            }
        }
    }

    fn set_duration(self: &Arc<Self>, duration: Option<Duration>) -> Result<(), TransportError> {
        let _commands = self.commands.lock();
        let mut core = self.core.lock();
        core.config.max_duration = duration;
        if let Some(session) = core.session.as_mut() {
            session.info.max_duration = duration;
        }
        if !core.state.is_streaming() {
            return Ok(());
        }

        match duration {
            None => core.duration_timer = None,
            Some(limit) if limit <= core.clock.elapsed() => {
                drop(core);
                log::info!("Duration limit already reached, stopping");
                return self.stop();
            }
            Some(_) => self.arm_duration_limit(&mut core),
        }
        Ok(())
    }

    fn set_sample_rate(&self, sample_rate: u32) -> Result<(), TransportError> {
        let _commands = self.commands.lock();
        let mut core = self.core.lock();
        if core.state != TransportState::Ready || core.pending.is_some() {
            return Err(TransportError::invalid(Command::SetSampleRate, core.state));
        }
        let candidate = TransportConfiguration {
            sample_rate,
            ..core.config.clone()
        };
        candidate
            .validate()
            .map_err(TransportError::ConfigurationFailed)?;
        core.config = candidate;
        Ok(())
    }

    /// (Re)arm the duration limit for the time left on the active clock.
    fn arm_duration_limit(self: &Arc<Self>, core: &mut Core<B>) {
        core.duration_timer = None;
        let Some(limit) = core.config.max_duration else {
            return;
        };
        let remaining = limit.saturating_sub(core.clock.elapsed());
        let weak = Arc::downgrade(self);
        match Countdown::start("duration-limit", remaining, move |token| {
            if let Some(shared) = weak.upgrade() {
                shared.on_duration_elapsed(&token);
            }
        }) {
            Ok(countdown) => core.duration_timer = Some(countdown),
            Err(e) => log::error!("Failed to arm duration limit: {}", e),
        }
    }

    // --- Timer, fault and end-of-stream handlers ---

    fn on_delay_elapsed(self: &Arc<Self>, token: &TimerToken) {
        let _commands = self.commands.lock();
        if token.is_cancelled() {
            return;
        }
        let mut core = self.core.lock();
        let Some(PendingRecord { guard, .. }) = core.pending.take() else {
            return;
        };
        match self.begin_recording(&mut core, guard) {
            Ok(event) => {
                drop(core);
                self.emit_transition(&event);
            }
            Err(e) => {
                drop(core);
                log::error!("Delayed record failed to start: {}", e);
                self.notify(|o| o.on_error(&e));
            }
        }
    }

    fn on_duration_elapsed(&self, token: &TimerToken) {
        let _commands = self.commands.lock();
        if token.is_cancelled() {
            return;
        }
        log::info!("Duration limit reached");
        if let Err(e) = self.stop() {
            log::warn!("Duration limit stop failed: {}", e);
        }
    }

    fn on_playback_finished(&self, generation: u64) {
        let _commands = self.commands.lock();
        {
            let core = self.core.lock();
            let playing = core.state == TransportState::Playing
                || core.paused_from == Some(TransportState::Playing);
            if core.generation != generation || !playing {
                return;
            }
        }
        if let Err(e) = self.stop() {
            log::warn!("End-of-playback stop failed: {}", e);
        }
    }

    fn on_stream_failed(&self, generation: u64, error: TransportError) {
        let _commands = self.commands.lock();
        let state = {
            let core = self.core.lock();
            if core.generation != generation {
                return;
            }
            core.state
        };
        log::error!("Stream failed while {}: {}", state, error);
        if matches!(
            state,
            TransportState::Recording | TransportState::Playing | TransportState::Paused
        ) {
            if let Err(e) = self.stop() {
                log::warn!("Stop after stream failure failed: {}", e);
            }
        }
        self.notify(|o| o.on_error(&error));
    }

    fn on_meter_tick(&self, token: &TimerToken, reported_overruns: &mut u64) {
        let _commands = self.commands.lock();
        if token.is_cancelled() {
            return;
        }
        let (state, elapsed, countdown) = {
            let core = self.core.lock();
            (
                core.state,
                core.clock.elapsed(),
                core.pending.as_ref().map(|p| p.countdown.remaining()),
            )
        };

        if let Some(remaining) = countdown {
            self.notify(|o| o.on_countdown(remaining));
        }
        if state.is_streaming() {
            let levels = self.meter.take();
            self.notify(|o| o.on_levels_updated(&levels, elapsed));
        }

        let overruns = self.counters.overrun_frames.load(Ordering::Relaxed);
        if overruns > *reported_overruns {
            let error = TransportError::Overrun {
                dropped_frames: overruns - *reported_overruns,
            };
            self.notify(|o| o.on_error(&error));
        }
        *reported_overruns = overruns;
    }

    // --- Notification ---

    fn commit(&self, core: &mut Core<B>, to: TransportState) -> TransitionEvent {
        let event = TransitionEvent {
            from: core.state,
            to,
            timestamp: self.created.elapsed(),
            elapsed: core.clock.elapsed(),
        };
        core.state = to;
        log::debug!("Transport {} -> {}", event.from, event.to);
        event
    }

    fn emit_transition(&self, event: &TransitionEvent) {
        self.notify(|o| o.on_state_changed(event));
    }

    /// Call `f` on every observer without holding any transport lock but
    /// the command lock.
    fn notify(&self, f: impl Fn(&dyn TransportObserver)) {
        let observers: Vec<_> = {
            let registered = self.observers.read();
            registered.iter().map(|(_, o)| Arc::clone(o)).collect()
        };
        for observer in &observers {
            f(observer.as_ref());
        }
    }
}

/// Frames actually present in a session file, for when finalize failed.
fn frames_on_disk(path: &Path) -> u64 {
    File::open(path)
        .ok()
        .and_then(|mut file| wav_format::read_wav_info(&mut file).ok())
        .map(|info| info.frame_count())
        .unwrap_or(0)
}

fn spawn_handler<F>(name: &str, f: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Err(e) = thread::Builder::new().name(name.into()).spawn(f) {
        log::error!("Failed to spawn {} handler: {}", name, e);
    }
}
