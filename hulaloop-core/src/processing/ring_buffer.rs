use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// One interleaved audio frame (`channels` samples).
pub type Frame = Vec<f32>;

/// Counters shared by both halves of a ring buffer.
#[derive(Debug, Default)]
struct RingStats {
    pushed: AtomicU64,
    dropped: AtomicU64,
}

/// Fixed-capacity single-producer/single-consumer ring of audio frames.
///
/// Built on `ringbuf`'s lock-free heap ring. Call [`split`](Self::split) to
/// obtain the producer half (handed to the backend callback) and the
/// consumer half (handed to the pump thread). The type system enforces the
/// single-writer/single-reader discipline.
///
/// Overflow behavior: new frames are dropped and counted; queued frames are
/// never overwritten. Only whole frames are ever committed, so the consumer
/// never observes a torn frame.
pub struct RingBuffer {
    ring: HeapRb<f32>,
    channels: usize,
    capacity: usize,
}

impl RingBuffer {
    /// Create a ring holding `capacity` frames of `channels` samples each.
    pub fn new(capacity: usize, channels: u16) -> Self {
        let channels = channels.max(1) as usize;
        let capacity = capacity.max(1);
        Self {
            ring: HeapRb::new(capacity * channels),
            channels,
            capacity,
        }
    }

    /// The total capacity of the buffer, in frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn split(self) -> (FrameProducer, FrameConsumer) {
        let stats = Arc::new(RingStats::default());
        let (producer, consumer) = self.ring.split();
        (
            FrameProducer {
                inner: producer,
                channels: self.channels,
                stats: Arc::clone(&stats),
            },
            FrameConsumer {
                inner: consumer,
                channels: self.channels,
                stats,
            },
        )
    }
}

/// Writing half. Owned by the realtime callback; never blocks.
pub struct FrameProducer {
    inner: HeapProd<f32>,
    channels: usize,
    stats: Arc<RingStats>,
}

impl FrameProducer {
    /// Push one frame. Returns `false` (and counts an overrun) when full.
    ///
    /// A slice whose length is not exactly one frame is rejected without
    /// being counted.
    pub fn push(&mut self, frame: &[f32]) -> bool {
        if frame.len() != self.channels {
            return false;
        }
        if self.inner.vacant_len() < self.channels {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.inner.push_slice(frame);
        self.stats.pushed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Push as many whole frames from `samples` as fit.
    ///
    /// Frames that do not fit are dropped and counted as overrun. A trailing
    /// partial frame is ignored. Returns the number of frames written.
    pub fn push_frames(&mut self, samples: &[f32]) -> usize {
        let offered = samples.len() / self.channels;
        let room = self.inner.vacant_len() / self.channels;
        let frames = offered.min(room);
        if frames > 0 {
            self.inner.push_slice(&samples[..frames * self.channels]);
            self.stats
                .pushed
                .fetch_add(frames as u64, Ordering::Relaxed);
        }
        let dropped = offered - frames;
        if dropped > 0 {
            self.stats
                .dropped
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
        frames
    }

    /// Frames that can be pushed right now.
    pub fn free_frames(&self) -> usize {
        self.inner.vacant_len() / self.channels
    }

    /// Frames queued and not yet consumed.
    pub fn queued_frames(&self) -> usize {
        self.inner.occupied_len() / self.channels
    }

    pub fn dropped_frames(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

/// Reading half. Owned by the pump thread or the render callback.
pub struct FrameConsumer {
    inner: HeapCons<f32>,
    channels: usize,
    stats: Arc<RingStats>,
}

impl FrameConsumer {
    /// Pop one frame, or `None` when empty.
    pub fn pop(&mut self) -> Option<Frame> {
        if self.inner.occupied_len() < self.channels {
            return None;
        }
        let mut frame = vec![0.0; self.channels];
        self.inner.pop_slice(&mut frame);
        Some(frame)
    }

    /// Pop up to `out.len() / channels` whole frames into `out`.
    ///
    /// Returns the number of frames read. Does not allocate.
    pub fn pop_frames(&mut self, out: &mut [f32]) -> usize {
        let wanted = out.len() / self.channels;
        let available = self.inner.occupied_len() / self.channels;
        let frames = wanted.min(available);
        if frames > 0 {
            self.inner.pop_slice(&mut out[..frames * self.channels]);
        }
        frames
    }

    /// Number of frames currently available for reading.
    pub fn queued_frames(&self) -> usize {
        self.inner.occupied_len() / self.channels
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.queued_frames() == 0
    }

    /// Total frames accepted by the producer so far.
    pub fn pushed_frames(&self) -> u64 {
        self.stats.pushed.load(Ordering::Relaxed)
    }

    /// Total frames the producer dropped because the buffer was full.
    pub fn dropped_frames(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn basic_push_pop() {
        let (mut producer, mut consumer) = RingBuffer::new(4, 2).split();
        assert!(producer.push(&[1.0, 2.0]));
        assert!(producer.push(&[3.0, 4.0]));

        assert_eq!(consumer.queued_frames(), 2);
        assert_eq!(consumer.pop(), Some(vec![1.0, 2.0]));
        assert_eq!(consumer.pop(), Some(vec![3.0, 4.0]));
        assert_eq!(consumer.pop(), None);
        assert!(consumer.is_empty());
    }

    #[test]
    fn full_buffer_drops_new_frames() {
        let (mut producer, mut consumer) = RingBuffer::new(2, 1).split();
        assert!(producer.push(&[1.0]));
        assert!(producer.push(&[2.0]));
        assert!(!producer.push(&[3.0])); // full: dropped

        assert_eq!(producer.dropped_frames(), 1);
        assert_eq!(consumer.pop(), Some(vec![1.0]));
        assert_eq!(consumer.pop(), Some(vec![2.0]));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn wrong_width_frame_is_rejected() {
        let (mut producer, consumer) = RingBuffer::new(4, 2).split();
        assert!(!producer.push(&[1.0]));
        assert!(!producer.push(&[1.0, 2.0, 3.0]));
        assert_eq!(producer.dropped_frames(), 0);
        assert!(consumer.is_empty());
    }

    #[test]
    fn push_frames_keeps_head_and_counts_rest() {
        let (mut producer, mut consumer) = RingBuffer::new(3, 2).split();
        let written = producer.push_frames(&[1.0, 1.5, 2.0, 2.5, 3.0, 3.5, 4.0, 4.5, 5.0]);

        assert_eq!(written, 3);
        assert_eq!(producer.dropped_frames(), 1); // the trailing half frame is not counted
        let mut out = [0.0; 8];
        assert_eq!(consumer.pop_frames(&mut out), 3);
        assert_eq!(&out[..6], &[1.0, 1.5, 2.0, 2.5, 3.0, 3.5]);
        assert_eq!(consumer.pushed_frames(), 3);
    }

    #[test]
    fn wraparound() {
        let (mut producer, mut consumer) = RingBuffer::new(4, 1).split();

        producer.push_frames(&[1.0, 2.0, 3.0]);
        let mut out = [0.0; 2];
        consumer.pop_frames(&mut out); // discard 1.0, 2.0

        assert_eq!(producer.push_frames(&[4.0, 5.0, 6.0]), 3); // wraps around

        let mut rest = [0.0; 4];
        assert_eq!(consumer.pop_frames(&mut rest), 4);
        assert_eq!(rest, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn pop_frames_reads_partial() {
        let (mut producer, mut consumer) = RingBuffer::new(8, 1).split();
        producer.push_frames(&[1.0, 2.0, 3.0, 4.0, 5.0]);

        let mut first = [0.0; 3];
        assert_eq!(consumer.pop_frames(&mut first), 3);
        assert_eq!(first, [1.0, 2.0, 3.0]);

        let mut rest = [0.0; 10]; // request more than available
        assert_eq!(consumer.pop_frames(&mut rest), 2);
        assert_eq!(&rest[..2], &[4.0, 5.0]);
        assert!(consumer.is_empty());
    }

    #[test]
    fn empty_operations() {
        let (mut producer, mut consumer) = RingBuffer::new(4, 1).split();
        assert!(consumer.pop().is_none());
        assert_eq!(consumer.pop_frames(&mut [0.0; 4]), 0);
        assert_eq!(producer.push_frames(&[]), 0);
        assert_eq!(producer.free_frames(), 4);
    }

    #[test]
    fn concurrent_frames_are_never_duplicated_or_skipped() {
        const TOTAL: usize = 50_000;
        let (mut producer, mut consumer) = RingBuffer::new(64, 2).split();

        let writer = thread::spawn(move || {
            let mut accepted = Vec::new();
            for i in 0..TOTAL {
                let value = i as f32;
                if producer.push(&[value, -value]) {
                    accepted.push(i);
                }
                if i % 1000 == 0 {
                    thread::yield_now();
                }
            }
            (accepted, producer.dropped_frames())
        });

        let mut received = Vec::new();
        let mut scratch = [0.0f32; 32];
        loop {
            let n = consumer.pop_frames(&mut scratch);
            for frame in scratch[..n * 2].chunks(2) {
                assert_eq!(frame[0], -frame[1], "torn frame");
                received.push(frame[0] as usize);
            }
            if n == 0 {
                if writer.is_finished() && consumer.is_empty() {
                    break;
                }
                thread::sleep(Duration::from_micros(50));
            }
        }

        let (accepted, dropped) = writer.join().unwrap();
        assert_eq!(received, accepted);
        assert_eq!(received.len() as u64 + dropped, TOTAL as u64);
    }
}
