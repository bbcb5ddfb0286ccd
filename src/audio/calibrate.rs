//! Offline silence-threshold calibration.
//!
//! Captures the configured device for a few seconds of representative
//! quiet, measures the RMS level in the same i16 scale the live pipeline
//! uses, and adds a 10% margin. The caller persists the result back into
//! the config document.

use anyhow::{bail, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::Config;

use super::capture::{AudioCapture, CaptureSettings};

const MARGIN: f32 = 1.1;

/// Captures for `duration_secs` and returns the calibrated threshold.
pub fn run(config: &Config, duration_secs: u64) -> Result<f32> {
    log::info!(
        "Starting silence threshold calibration for {} seconds...",
        duration_secs
    );

    let settings = CaptureSettings {
        device_name: config.audio_device.clone(),
        sample_rate: config.advanced.sample_rate,
        channels: config.advanced.channels as u16,
        frames_per_buffer: config.advanced.frames_per_buffer as u32,
    };

    // (sum of squared samples, sample count) in i16 scale.
    let accum = Arc::new(Mutex::new((0.0f64, 0u64)));
    let sink = Arc::clone(&accum);

    let mut capture = AudioCapture::open(&settings)?;
    capture.start(move |data: &[f32]| {
        let mut accum = match sink.lock() {
            Ok(accum) => accum,
            Err(_) => return,
        };
        for &sample in data {
            let scaled = (sample * 32767.0) as f64;
            accum.0 += scaled * scaled;
        }
        accum.1 += data.len() as u64;
    })?;

    for second in 1..=duration_secs {
        std::thread::sleep(Duration::from_secs(1));
        log::info!("Calibration in progress: {} seconds...", second);
    }
    capture.stop();

    let (sum_squares, count) = *accum.lock().expect("calibration accumulator poisoned");
    let Some(threshold) = threshold_from_power(sum_squares, count) else {
        bail!("No audio captured during calibration");
    };
    log::info!("Calibrated silence threshold: {:.2}", threshold);
    Ok(threshold)
}

/// RMS of the accumulated power with the safety margin applied.
fn threshold_from_power(sum_squares: f64, count: u64) -> Option<f32> {
    if count == 0 {
        return None;
    }
    Some(((sum_squares / count as f64).sqrt() as f32) * MARGIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_rms_with_ten_percent_margin() {
        // 1000 samples all at amplitude 300: RMS 300, threshold 330.
        let sum_squares = 1000.0 * 300.0 * 300.0;
        let threshold = threshold_from_power(sum_squares, 1000).unwrap();
        assert!((threshold - 330.0).abs() < 1e-3);
    }

    #[test]
    fn no_samples_yields_no_threshold() {
        assert!(threshold_from_power(0.0, 0).is_none());
    }
}
