use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::models::audio_models::TransportDiagnostics;
use crate::models::error::TransportError;
use crate::processing::ring_buffer::{FrameConsumer, FrameProducer};
use crate::processing::wav_format;
use crate::storage::wav_writer::{WavFileWriter, WavSummary};
use crate::traits::audio_backend::StreamErrorCallback;

/// Sleep between polls of an empty (or full) ring.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Frames moved per pump iteration.
const PUMP_CHUNK_FRAMES: usize = 2048;

/// Minimum spacing between overrun warnings.
const OVERRUN_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Counters shared by the realtime callbacks and the pump threads.
#[derive(Debug, Default)]
pub struct StreamCounters {
    pub capture_callbacks: AtomicU64,
    pub render_callbacks: AtomicU64,
    pub frames_captured: AtomicU64,
    pub frames_played: AtomicU64,
    pub overrun_frames: AtomicU64,
    pub underrun_frames: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl StreamCounters {
    pub fn snapshot(&self) -> TransportDiagnostics {
        TransportDiagnostics {
            capture_callback_count: self.capture_callbacks.load(Ordering::Relaxed),
            render_callback_count: self.render_callbacks.load(Ordering::Relaxed),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_played: self.frames_played.load(Ordering::Relaxed),
            overrun_frames: self.overrun_frames.load(Ordering::Relaxed),
            underrun_frames: self.underrun_frames.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.capture_callbacks,
            &self.render_callbacks,
            &self.frames_captured,
            &self.frames_played,
            &self.overrun_frames,
            &self.underrun_frames,
            &self.bytes_written,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Moves captured frames from the ring buffer into the session file.
///
/// ```text
/// [backend callback] → [FrameProducer] ⇢ [FrameConsumer] → [WavFileWriter]
///     realtime thread          ring buffer         "capture-pump" thread
/// ```
///
/// [`finish`](Self::finish) drains whatever is still queued, patches the
/// WAV header and reports what was written.
///
/// A failed write ends the pump: `on_failure` gets the error once and the
/// header is patched to cover the frames written before it.
pub struct CapturePump {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<Option<WavSummary>, TransportError>>>,
}

impl CapturePump {
    pub fn spawn(
        mut consumer: FrameConsumer,
        mut writer: WavFileWriter,
        counters: Arc<StreamCounters>,
        on_failure: StreamErrorCallback,
    ) -> Result<Self, TransportError> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("capture-pump".into())
            .spawn(move || {
                let channels = consumer.channels();
                let mut scratch = vec![0.0f32; PUMP_CHUNK_FRAMES * channels];
                let mut reported_overruns = 0u64;
                let mut last_overrun_log: Option<Instant> = None;

                loop {
                    // Read the flag before draining so frames pushed before
                    // stop() returned are always written.
                    let stopping = thread_stop.load(Ordering::Acquire);
                    let frames = consumer.pop_frames(&mut scratch);
                    if frames > 0 {
                        if let Err(e) = writer.write_samples(&scratch[..frames * channels]) {
                            log::error!(
                                "Session write failed after {} frames: {}",
                                writer.frames_written(),
                                e
                            );
                            on_failure(e);
                            return Ok(finalize_after_failure(writer));
                        }
                        counters
                            .bytes_written
                            .store(writer.bytes_written(), Ordering::Relaxed);
                        continue;
                    }

                    let dropped = consumer.dropped_frames();
                    if dropped > reported_overruns {
                        counters.overrun_frames.store(dropped, Ordering::Relaxed);
                        if last_overrun_log.is_none_or(|t| t.elapsed() >= OVERRUN_LOG_INTERVAL) {
                            log::warn!(
                                "Capture overrun: {} frames dropped ({} total)",
                                dropped - reported_overruns,
                                dropped
                            );
                            last_overrun_log = Some(Instant::now());
                        }
                        reported_overruns = dropped;
                    }

                    if stopping {
                        break;
                    }
                    thread::sleep(POLL_INTERVAL);
                }

                writer.finalize().map(Some)
            })
            .map_err(|e| {
                TransportError::StreamFailed(format!("failed to spawn capture pump: {}", e))
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Drain, finalize and join.
    ///
    /// Call only after the producer side has stopped. `Ok(None)` means a
    /// write failure was already reported and the header could not be
    /// patched; the file length is then the only record of its frames.
    pub fn finish(mut self) -> Result<Option<WavSummary>, TransportError> {
        self.stop.store(true, Ordering::Release);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| TransportError::StreamFailed("capture pump panicked".into()))?,
            None => Err(TransportError::StreamFailed(
                "capture pump already finished".into(),
            )),
        }
    }
}

fn finalize_after_failure(writer: WavFileWriter) -> Option<WavSummary> {
    match writer.finalize() {
        Ok(summary) => Some(summary),
        Err(e) => {
            log::warn!("Could not patch session header after write failure: {}", e);
            None
        }
    }
}

impl Drop for CapturePump {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Streams a finalized session file into the playback ring buffer.
///
/// When the file is exhausted and the render callback has drained the ring,
/// `on_finished` runs once on the feeder thread. It must not block on
/// anything held by the thread that calls [`stop`](Self::stop).
pub struct PlaybackFeeder {
    stop: Arc<AtomicBool>,
    source_done: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PlaybackFeeder {
    pub fn spawn<F>(
        path: &Path,
        mut producer: FrameProducer,
        on_finished: F,
    ) -> Result<Self, TransportError>
    where
        F: FnOnce() + Send + 'static,
    {
        let file = File::open(path).map_err(|e| {
            TransportError::StorageError(format!("failed to open session file: {}", e))
        })?;
        let mut reader = BufReader::new(file);
        let info = wav_format::read_wav_info(&mut reader)?;
        reader
            .seek(SeekFrom::Start(info.data_offset))
            .map_err(|e| TransportError::StorageError(e.to_string()))?;

        let stop = Arc::new(AtomicBool::new(false));
        let source_done = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread_done = Arc::clone(&source_done);

        let handle = thread::Builder::new()
            .name("playback-feeder".into())
            .spawn(move || {
                let frame_bytes = info.format.bytes_per_frame();
                let mut remaining = info.frame_count();
                let mut raw = vec![0u8; PUMP_CHUNK_FRAMES * frame_bytes];
                let channels = info.format.channels as usize;
                let mut samples = Vec::with_capacity(PUMP_CHUNK_FRAMES * channels);

                while remaining > 0 {
                    if thread_stop.load(Ordering::Acquire) {
                        return;
                    }
                    let free = producer.free_frames().min(PUMP_CHUNK_FRAMES);
                    if free == 0 {
                        thread::sleep(POLL_INTERVAL);
                        continue;
                    }
                    let frames = (remaining as usize).min(free);
                    let bytes = &mut raw[..frames * frame_bytes];
                    if let Err(e) = reader.read_exact(bytes) {
                        log::error!("Playback read failed, ending early: {}", e);
                        break;
                    }
                    samples.clear();
                    wav_format::decode_samples(bytes, info.format.sample_format, &mut samples);
                    producer.push_frames(&samples);
                    remaining -= frames as u64;
                }
                thread_done.store(true, Ordering::Release);

                while producer.queued_frames() > 0 {
                    if thread_stop.load(Ordering::Acquire) {
                        return;
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                if !thread_stop.load(Ordering::Acquire) {
                    log::debug!("Playback reached end of session");
                    on_finished();
                }
            })
            .map_err(|e| {
                TransportError::StreamFailed(format!("failed to spawn playback feeder: {}", e))
            })?;

        Ok(Self {
            stop,
            source_done,
            handle: Some(handle),
        })
    }

    /// Set once every frame of the file has been queued.
    pub fn source_done(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.source_done)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            let _ = handle.join();
        }
    }
}

impl Drop for PlaybackFeeder {
    fn drop(&mut self) {
        self.shutdown();
    }
}
