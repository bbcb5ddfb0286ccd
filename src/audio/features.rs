//! Rolling energy statistics, adaptive silence gating, and level
//! normalization.
//!
//! Samples are carried as f32 in the i16 range (cpal's floats scaled by
//! 32767) so the RMS-domain tunables in the config keep their meaning.

use std::collections::VecDeque;

pub const SAMPLE_MIN: f32 = -32768.0;
pub const SAMPLE_MAX: f32 = 32767.0;

/// Fraction of the observed volume range added above the minimum to form
/// the adaptive silence floor.
const SILENCE_FLOOR_FRACTION: f32 = 0.1;

pub struct FeatureExtractor {
    window: VecDeque<f32>,
    capacity: usize,
    sensitivity_multiplier: f32,
    dynamic_threshold: f32,
    target_rms: f32,
    observed_min: f32,
    observed_max: f32,
}

impl FeatureExtractor {
    /// `threshold_seed` holds until the first buffer refreshes the window;
    /// `silence_seed` (when positive, e.g. from calibration) pre-loads the
    /// observed volume range.
    pub fn new(
        capacity: usize,
        sensitivity_multiplier: f32,
        threshold_seed: f32,
        target_rms: f32,
        silence_seed: f32,
    ) -> Self {
        let (observed_min, observed_max) = if silence_seed > 0.0 {
            (silence_seed, silence_seed)
        } else {
            (f32::MAX, f32::MIN)
        };
        Self {
            window: VecDeque::with_capacity(capacity + 1),
            capacity,
            sensitivity_multiplier,
            dynamic_threshold: threshold_seed,
            target_rms,
            observed_min,
            observed_max,
        }
    }

    pub fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
        (sum_squares / samples.len() as f32).sqrt()
    }

    /// Widens the observed volume range with `rms` and reports whether the
    /// buffer falls below the adaptive silence floor
    /// (`min + (max - min) * 0.1`). The range never narrows within a run.
    pub fn is_silent(&mut self, rms: f32) -> bool {
        self.observed_min = self.observed_min.min(rms);
        self.observed_max = self.observed_max.max(rms);
        let floor = self.observed_min
            + (self.observed_max - self.observed_min) * SILENCE_FLOOR_FRACTION;
        if rms < floor {
            log::debug!("Volume {:.1} below silence floor {:.1}, skipping", rms, floor);
            true
        } else {
            false
        }
    }

    /// Scales the buffer toward the target RMS and clamps to the legal
    /// sample range. `rms` is the pre-gain level.
    pub fn normalize(&self, samples: &mut [f32], rms: f32) {
        let gain = self.target_rms / rms.max(1.0);
        for sample in samples.iter_mut() {
            *sample = (*sample * gain).clamp(SAMPLE_MIN, SAMPLE_MAX);
        }
        log::trace!("Applied gain {:.3} (pre-gain RMS {:.1})", gain, rms);
    }

    /// Pushes the buffer's mean magnitude into the rolling window (oldest
    /// evicted past capacity) and recomputes the dynamic threshold from the
    /// current window. Runs every analyzed buffer, beat or not.
    pub fn update_energy(&mut self, magnitudes: &[f32]) -> f32 {
        let energy = if magnitudes.is_empty() {
            0.0
        } else {
            magnitudes.iter().sum::<f32>() / magnitudes.len() as f32
        };

        self.window.push_back(energy);
        while self.window.len() > self.capacity {
            self.window.pop_front();
        }

        let mean = self.window.iter().sum::<f32>() / self.window.len() as f32;
        self.dynamic_threshold = mean * self.sensitivity_multiplier;
        energy
    }

    pub fn dynamic_threshold(&self) -> f32 {
        self.dynamic_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor(capacity: usize, sensitivity: f32) -> FeatureExtractor {
        FeatureExtractor::new(capacity, sensitivity, 0.0, 10000.0, 0.0)
    }

    #[test]
    fn threshold_is_window_mean_times_sensitivity() {
        let mut fx = extractor(10, 1.5);
        fx.update_energy(&[2.0, 4.0]); // energy 3.0
        fx.update_energy(&[5.0, 5.0]); // energy 5.0
        let expected = (3.0 + 5.0) / 2.0 * 1.5;
        assert!((fx.dynamic_threshold() - expected).abs() < 1e-6);
    }

    #[test]
    fn window_drops_oldest_past_capacity() {
        let mut fx = extractor(3, 1.0);
        for energy in [1.0, 2.0, 3.0, 10.0] {
            fx.update_energy(&[energy]);
        }
        // Window is now [2, 3, 10].
        assert!((fx.dynamic_threshold() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn threshold_recomputed_idempotently() {
        let mut a = extractor(4, 2.0);
        let mut b = extractor(4, 2.0);
        for energy in [1.0, 2.0, 3.0] {
            a.update_energy(&[energy]);
            b.update_energy(&[energy]);
        }
        assert_eq!(a.dynamic_threshold(), b.dynamic_threshold());
    }

    #[test]
    fn threshold_seed_holds_until_first_buffer() {
        let fx = FeatureExtractor::new(10, 1.0, 42.0, 10000.0, 0.0);
        assert_eq!(fx.dynamic_threshold(), 42.0);
    }

    #[test]
    fn rms_of_constant_signal() {
        assert!((FeatureExtractor::rms(&[3.0, -3.0, 3.0, -3.0]) - 3.0).abs() < 1e-6);
        assert_eq!(FeatureExtractor::rms(&[]), 0.0);
    }

    #[test]
    fn silence_floor_tracks_observed_range() {
        let mut fx = extractor(10, 1.0);
        // Establish observed_min = 100, observed_max = 1000.
        assert!(!fx.is_silent(100.0));
        assert!(!fx.is_silent(1000.0));
        // Floor is 100 + 900 * 0.1 = 190.
        assert!(fx.is_silent(150.0));
        assert!(!fx.is_silent(250.0));
    }

    #[test]
    fn observed_range_only_widens() {
        let mut fx = extractor(10, 1.0);
        fx.is_silent(100.0);
        fx.is_silent(1000.0);
        // A mid-range value must not narrow the floor.
        fx.is_silent(500.0);
        assert!(fx.is_silent(150.0));
        // A quieter buffer lowers the floor.
        fx.is_silent(10.0);
        let floor = 10.0 + (1000.0 - 10.0) * 0.1;
        assert!(!fx.is_silent(floor + 1.0));
    }

    #[test]
    fn calibrated_seed_preloads_the_range() {
        let mut fx = FeatureExtractor::new(10, 1.0, 0.0, 10000.0, 200.0);
        // Range starts collapsed at the seed; a loud buffer widens it and
        // quiet buffers below the floor are gated.
        assert!(!fx.is_silent(2200.0));
        assert!(fx.is_silent(250.0));
    }

    #[test]
    fn normalize_scales_toward_target_and_clamps() {
        let fx = FeatureExtractor::new(10, 1.0, 0.0, 10000.0, 0.0);
        let mut samples = vec![1000.0, -1000.0];
        let rms = FeatureExtractor::rms(&samples);
        fx.normalize(&mut samples, rms);
        assert!((FeatureExtractor::rms(&samples) - 10000.0).abs() < 1.0);

        // A huge gain on a hot signal clamps at the i16 range.
        let fx = FeatureExtractor::new(10, 1.0, 0.0, 1.0e9, 0.0);
        let mut hot = vec![30000.0, -30000.0];
        let rms = FeatureExtractor::rms(&hot);
        fx.normalize(&mut hot, rms);
        assert_eq!(hot, vec![32767.0, -32768.0]);
    }
}
