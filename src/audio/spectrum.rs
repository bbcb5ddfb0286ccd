//! Fixed-size spectral analysis of a single capture channel.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Per-buffer spectrum result. Recomputed every buffer, never retained.
#[derive(Debug, Clone)]
pub struct SpectrumSnapshot {
    /// Magnitude per frequency bin, `size / 2 + 1` entries.
    pub magnitudes: Vec<f32>,
    pub peak_bin: usize,
    pub peak_frequency_hz: f32,
    pub peak_magnitude: f32,
}

/// Forward FFT over the first channel of an interleaved buffer.
///
/// The transform plan and its work buffers are built once here and reused
/// for every buffer; they are released when the analyzer is dropped at
/// pipeline teardown.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    input: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    size: usize,
    sample_rate: u32,
}

impl SpectrumAnalyzer {
    pub fn new(size: usize, sample_rate: u32) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            fft,
            input: vec![Complex::new(0.0, 0.0); size],
            scratch,
            size,
            sample_rate,
        }
    }

    /// Analyzes the first channel of `samples` (interleaved, `channels`
    /// wide). Returns `None` when the buffer is too short to fill the
    /// transform input — the "no signal" case, never a panic.
    pub fn analyze(&mut self, samples: &[f32], channels: usize) -> Option<SpectrumSnapshot> {
        if samples.len() < self.size * channels {
            log::warn!(
                "Capture buffer too small for analysis: {} < {}",
                samples.len(),
                self.size * channels
            );
            return None;
        }

        for i in 0..self.size {
            self.input[i] = Complex::new(samples[i * channels], 0.0);
        }
        self.fft.process_with_scratch(&mut self.input, &mut self.scratch);

        let magnitudes: Vec<f32> = self.input[..self.size / 2 + 1]
            .iter()
            .map(|c| c.norm())
            .collect();

        // Ties resolve to the lowest bin.
        let mut peak_bin = 0;
        for (i, &mag) in magnitudes.iter().enumerate() {
            if mag > magnitudes[peak_bin] {
                peak_bin = i;
            }
        }

        Some(SpectrumSnapshot {
            peak_frequency_hz: peak_bin as f32 * self.sample_rate as f32 / self.size as f32,
            peak_magnitude: magnitudes[peak_bin],
            peak_bin,
            magnitudes,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }
}
