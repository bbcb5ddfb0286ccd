//! Frequency-to-color mapping strategies.
//!
//! All strategies operate over a fixture's configured palette and clamp
//! their output channels to [0, 255] before returning.

/// Channels stay `i32` so blends can pass through out-of-range
/// intermediates; outputs are clamped at the strategy boundary.
pub type Rgb = [i32; 3];

pub const BLACK: Rgb = [0, 0, 0];

pub fn clamp_channels(color: Rgb) -> Rgb {
    [
        color[0].clamp(0, 255),
        color[1].clamp(0, 255),
        color[2].clamp(0, 255),
    ]
}

/// Range mapping: split the Nyquist range into `palette.len()` equal bands
/// and pick the band containing `frequency`, clamped to the last band.
pub fn map_frequency_to_color(frequency: f32, palette: &[Rgb], sample_rate: u32) -> Rgb {
    if palette.is_empty() {
        return BLACK;
    }
    let nyquist = sample_rate as f32 / 2.0;
    let band_size = nyquist / palette.len() as f32;
    let index = ((frequency / band_size) as usize).min(palette.len() - 1);
    clamp_channels(palette[index])
}

/// Linear blend: per-channel interpolation from `current` toward `target`.
pub fn blend(current: Rgb, target: Rgb, factor: f32) -> Rgb {
    let factor = factor.clamp(0.0, 1.0);
    let mut out = BLACK;
    for i in 0..3 {
        out[i] = current[i] + (factor * (target[i] - current[i]) as f32) as i32;
    }
    clamp_channels(out)
}

/// Directional cycling: three independent rotating palette indices, one per
/// frequency direction, with a private previous-frequency latch.
#[derive(Debug, Clone)]
pub struct DirectionalCycle {
    rise_index: usize,
    fall_index: usize,
    neutral_index: usize,
    prev_frequency: f32,
}

impl Default for DirectionalCycle {
    fn default() -> Self {
        Self {
            rise_index: 2,
            fall_index: 0,
            neutral_index: 1,
            prev_frequency: 220.0,
        }
    }
}

impl DirectionalCycle {
    /// Picks the palette entry for the direction the frequency moved, then
    /// advances only that direction's index. Palettes shorter than three
    /// entries yield black.
    pub fn pick(&mut self, frequency: f32, palette: &[Rgb]) -> Rgb {
        if palette.len() < 3 {
            return BLACK;
        }

        let color = if frequency > self.prev_frequency {
            let color = palette[self.rise_index];
            self.rise_index = (self.rise_index + 1) % palette.len();
            color
        } else if frequency < self.prev_frequency {
            let color = palette[self.fall_index];
            self.fall_index = (self.fall_index + 1) % palette.len();
            color
        } else {
            let color = palette[self.neutral_index];
            self.neutral_index = (self.neutral_index + 1) % palette.len();
            color
        };

        self.prev_frequency = frequency;
        clamp_channels(color)
    }
}
