use std::sync::atomic::{AtomicU32, Ordering};

use crate::models::audio_models::AudioLevels;

/// Compute RMS level of samples.
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Compute peak absolute level of samples.
pub fn peak_level(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

/// Lock-free level store written from the realtime callback.
///
/// `f32` values are kept as raw bits in atomics so the callback never takes
/// a lock. The peak holds until [`take`](Self::take) resets it.
#[derive(Debug, Default)]
pub struct LevelMeter {
    level: AtomicU32,
    peak: AtomicU32,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a block of samples.
    pub fn update(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let rms = rms_level(samples);
        self.level.store(rms.to_bits(), Ordering::Relaxed);
        let peak = peak_level(samples);
        let _ = self
            .peak
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                (peak > f32::from_bits(bits)).then_some(peak.to_bits())
            });
    }

    /// Current levels without resetting the peak.
    pub fn snapshot(&self) -> AudioLevels {
        AudioLevels {
            level: f32::from_bits(self.level.load(Ordering::Relaxed)),
            peak_level: f32::from_bits(self.peak.load(Ordering::Relaxed)),
        }
    }

    /// Current levels; resets the held peak.
    pub fn take(&self) -> AudioLevels {
        AudioLevels {
            level: f32::from_bits(self.level.load(Ordering::Relaxed)),
            peak_level: f32::from_bits(self.peak.swap(0, Ordering::Relaxed)),
        }
    }

    pub fn reset(&self) {
        self.level.store(0, Ordering::Relaxed);
        self.peak.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rms_level_silence() {
        assert_eq!(rms_level(&[0.0, 0.0, 0.0]), 0.0);
        assert_eq!(rms_level(&[]), 0.0);
    }

    #[test]
    fn rms_level_full_scale() {
        assert_relative_eq!(rms_level(&[1.0, -1.0, 1.0]), 1.0);
    }

    #[test]
    fn peak_level_basic() {
        assert_relative_eq!(peak_level(&[0.1, -0.5, 0.3]), 0.5);
    }

    #[test]
    fn meter_holds_peak_until_taken() {
        let meter = LevelMeter::new();
        meter.update(&[0.8, -0.2]);
        meter.update(&[0.1, 0.1]);

        let levels = meter.take();
        assert_relative_eq!(levels.level, 0.1);
        assert_relative_eq!(levels.peak_level, 0.8);

        let after = meter.snapshot();
        assert_eq!(after.peak_level, 0.0);
    }
}
