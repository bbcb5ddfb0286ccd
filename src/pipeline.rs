//! Per-buffer processing pipeline and stream supervision.
//!
//! One real-time callback context runs the analyzer-through-dispatcher
//! chain and exclusively owns all analysis and dispatch state. A separate
//! supervisor context polls stream health and performs Degraded recovery.
//! The only cross-context values are the cancellation flag and the latest
//! dominant-bin magnitude, both atomics.

use anyhow::Result;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::audio::capture::{AudioCapture, CaptureSettings};
use crate::audio::features::FeatureExtractor;
use crate::audio::spectrum::SpectrumAnalyzer;
use crate::config::{Advanced, Config, Effect, FixtureConfig};
use crate::light::color::{self, DirectionalCycle, Rgb};
use crate::light::dispatch::{DispatchOutcome, Dispatcher};
use crate::light::transport::Transport;

/// Blend factor for the periodic path's smooth transitions.
const SMOOTH_BLEND_FACTOR: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Initialized,
    Running,
    Degraded,
    Stopped,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("capture stream recovery failed after {0} consecutive attempts")]
    RecoveryExhausted(u32),
    #[error("pipeline state poisoned by a panic during dispatch")]
    Poisoned,
}

/// Everything the beat/change detector and effect handlers need from one
/// buffer.
#[derive(Debug, Clone, Copy)]
struct BufferFeatures {
    frequency: f32,
    energy: f32,
    threshold: f32,
    beat: bool,
}

/// What an effect handler decided for one fixture this buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EffectAction {
    SetColor { color: Rgb, brightness: i32 },
    PowerOff,
}

pub struct Pipeline<T: Transport> {
    advanced: Advanced,
    fixtures: Arc<Vec<FixtureConfig>>,
    analyzer: SpectrumAnalyzer,
    features: FeatureExtractor,
    cycle: DirectionalCycle,
    dispatcher: Dispatcher<T>,
    /// Cooldown suppressing beat re-fires; decrements once per buffer.
    hysteresis_counter: u32,
    /// Previous dominant frequency, latched by the change detector.
    prev_frequency: f32,
    current_brightness: i32,
    last_periodic: Option<Instant>,
    prev_periodic_color: Rgb,
    /// Fixtures turned off by TurnOffOn, held dark until the delay elapses.
    off_since: HashMap<IpAddr, Instant>,
    /// Capture samples rescaled to i16 range; reused across buffers.
    scratch: Vec<f32>,
    /// Published for passive observation outside the callback context.
    peak_magnitude: Arc<AtomicU32>,
}

impl<T: Transport> Pipeline<T> {
    pub fn new(config: &Config, transport: T, peak_magnitude: Arc<AtomicU32>) -> Self {
        let advanced = config.advanced.clone();
        let dispatcher = Dispatcher::new(
            transport,
            advanced.udp_port,
            advanced.min_update_interval_ms,
            advanced.effects_enabled,
        );
        Self {
            analyzer: SpectrumAnalyzer::new(advanced.frames_per_buffer, advanced.sample_rate),
            features: FeatureExtractor::new(
                advanced.recent_energies_size,
                advanced.sensitivity_multiplier,
                advanced.dynamic_threshold,
                advanced.target_rms,
                advanced.silence_threshold,
            ),
            cycle: DirectionalCycle::default(),
            dispatcher,
            hysteresis_counter: advanced.hysteresis_cooldown,
            prev_frequency: 0.0,
            current_brightness: advanced.current_brightness,
            last_periodic: None,
            prev_periodic_color: color::BLACK,
            off_since: HashMap::new(),
            scratch: Vec::with_capacity(advanced.frames_per_buffer * advanced.channels),
            fixtures: Arc::new(config.fixtures.clone()),
            peak_magnitude,
            advanced,
        }
    }

    /// Runs the full chain for one capture buffer. Invoked from the audio
    /// callback context; must not block.
    pub fn process_buffer(&mut self, data: &[f32], now: Instant) {
        if data.iter().all(|&s| s == 0.0) {
            log::trace!("Captured buffer is all zeros, skipping");
            return;
        }

        self.scratch.clear();
        self.scratch.extend(data.iter().map(|&s| s * 32767.0));

        // Gating uses the pre-gain RMS; normalization feeds the transform.
        let rms = FeatureExtractor::rms(&self.scratch);
        if self.advanced.enable_silence_gate && self.features.is_silent(rms) {
            return;
        }
        self.features.normalize(&mut self.scratch, rms);

        let Some(snapshot) = self.analyzer.analyze(&self.scratch, self.advanced.channels) else {
            return;
        };
        self.peak_magnitude
            .store(snapshot.peak_magnitude.to_bits(), Ordering::Relaxed);

        let energy = self.features.update_energy(&snapshot.magnitudes);
        let features = BufferFeatures {
            frequency: snapshot.peak_frequency_hz,
            energy,
            threshold: self.features.dynamic_threshold(),
            beat: energy > self.features.dynamic_threshold() && self.hysteresis_counter == 0,
        };
        log::trace!(
            "Buffer: freq={:.1}Hz energy={:.2} threshold={:.2} beat={}",
            features.frequency,
            features.energy,
            features.threshold,
            features.beat
        );

        let fired = self.run_event_path(&features, now);
        if fired {
            self.hysteresis_counter = self.advanced.hysteresis_cooldown;
        } else {
            self.hysteresis_counter = self.hysteresis_counter.saturating_sub(1);
        }

        self.run_periodic_path(features.frequency, now);
    }

    /// Event-driven path, gated on a significant frequency change. Returns
    /// whether a beat-triggered effect fired (re-arming the hysteresis).
    fn run_event_path(&mut self, features: &BufferFeatures, now: Instant) -> bool {
        let delta = (features.frequency - self.prev_frequency).abs();
        if delta < self.advanced.frequency_change_threshold {
            return false;
        }

        let mut fired = false;
        let fixtures = Arc::clone(&self.fixtures);
        for fixture in fixtures.iter() {
            let action = match fixture.effect {
                Effect::ChangeColor => self.change_color_action(fixture, features),
                Effect::AdjustBrightness => self.adjust_brightness_action(fixture, features),
                Effect::TurnOffOn => self.turn_off_action(features),
            };
            match action {
                Some(EffectAction::SetColor { color, brightness }) => {
                    self.dispatcher.dispatch_color(fixture, color, brightness, now);
                }
                Some(EffectAction::PowerOff) => {
                    if self.dispatcher.dispatch_off(fixture, now) == DispatchOutcome::Sent {
                        self.off_since.insert(fixture.ip, now);
                    }
                }
                None => {}
            }
            if features.beat && matches!(fixture.effect, Effect::ChangeColor | Effect::TurnOffOn) {
                fired = true;
            }
        }

        self.prev_frequency = features.frequency;
        fired
    }

    fn change_color_action(
        &mut self,
        fixture: &FixtureConfig,
        features: &BufferFeatures,
    ) -> Option<EffectAction> {
        if !features.beat {
            return None;
        }
        Some(EffectAction::SetColor {
            color: self.cycle.pick(features.frequency, &fixture.colors),
            brightness: self.advanced.target_brightness,
        })
    }

    fn adjust_brightness_action(
        &mut self,
        fixture: &FixtureConfig,
        features: &BufferFeatures,
    ) -> Option<EffectAction> {
        let color = self.cycle.pick(features.frequency, &fixture.colors);
        if features.energy > features.threshold {
            self.current_brightness = (self.advanced.target_brightness
                + (features.energy * self.advanced.brightness_multiplier) as i32)
                .min(255);
            Some(EffectAction::SetColor {
                color,
                brightness: self.current_brightness,
            })
        } else if self.advanced.gradual_brightness_recovery
            && self.current_brightness != self.advanced.target_brightness
        {
            let step = (self.advanced.brightness_multiplier as i32).max(1);
            let target = self.advanced.target_brightness;
            self.current_brightness = if self.current_brightness > target {
                (self.current_brightness - step).max(target)
            } else {
                (self.current_brightness + step).min(target)
            };
            Some(EffectAction::SetColor {
                color,
                brightness: self.current_brightness,
            })
        } else {
            None
        }
    }

    fn turn_off_action(&mut self, features: &BufferFeatures) -> Option<EffectAction> {
        features.beat.then_some(EffectAction::PowerOff)
    }

    /// Ambient path: runs every buffer on a wall-clock cadence, independent
    /// of the detector.
    fn run_periodic_path(&mut self, frequency: f32, now: Instant) {
        let interval = Duration::from_millis(self.advanced.min_update_interval_ms);
        if let Some(last) = self.last_periodic {
            if now.saturating_duration_since(last) < interval {
                return;
            }
        }

        let fixtures = Arc::clone(&self.fixtures);
        let off_delay = Duration::from_millis(self.advanced.off_effect_delay_ms);
        for fixture in fixtures.iter() {
            // Hold fixtures dark for the off-effect delay, then let the
            // next color command restore them.
            if let Some(&off_at) = self.off_since.get(&fixture.ip) {
                if now.saturating_duration_since(off_at) < off_delay {
                    continue;
                }
                self.off_since.remove(&fixture.ip);
            }

            let target = color::map_frequency_to_color(
                frequency,
                &fixture.colors,
                self.advanced.sample_rate,
            );
            let resolved = if self.advanced.apply_smooth_transition {
                color::blend(self.prev_periodic_color, target, SMOOTH_BLEND_FACTOR)
            } else {
                target
            };
            self.prev_periodic_color = resolved;

            self.dispatcher.dispatch_color(
                fixture,
                resolved,
                self.advanced.target_brightness,
                now,
            );
        }
        self.last_periodic = Some(now);
    }
}

fn buffer_callback<T: Transport + Send>(
    pipeline: Arc<Mutex<Pipeline<T>>>,
) -> impl FnMut(&[f32]) + Send + 'static
where
    T: 'static,
{
    move |data: &[f32]| {
        // try_lock keeps the callback nonblocking; the supervisor only
        // holds the lock while the stream is down.
        if let Ok(mut pipeline) = pipeline.try_lock() {
            pipeline.process_buffer(data, Instant::now());
        }
    }
}

/// Supervises the capture stream for the life of the pipeline:
/// `Initialized -> Running -> (Degraded -> Running)* -> Stopped`.
///
/// Recovery closes and reopens the stream with identical parameters; three
/// consecutive reopen failures are fatal.
pub fn run_supervised<T: Transport + Send + 'static>(
    settings: CaptureSettings,
    pipeline: Arc<Mutex<Pipeline<T>>>,
    running: Arc<AtomicBool>,
    peak_magnitude: Arc<AtomicU32>,
) -> Result<()> {
    const MAX_RECOVERY_ATTEMPTS: u32 = 3;
    let poll = Duration::from_millis(250);

    let mut capture = AudioCapture::open(&settings)?;
    let mut state = PipelineState::Initialized;
    log::debug!("Pipeline state: {:?}", state);

    capture.start(buffer_callback(Arc::clone(&pipeline)))?;
    state = PipelineState::Running;
    log::info!("Processing audio from '{}'", settings.device_name);

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(poll);

        if pipeline.is_poisoned() {
            // A panic mid-dispatch may have left per-fixture state
            // inconsistent; stop instead of carrying on.
            capture.stop();
            log::error!("Pipeline state poisoned; stopping");
            return Err(PipelineError::Poisoned.into());
        }

        log::trace!(
            "Dominant magnitude: {:.1}",
            f32::from_bits(peak_magnitude.load(Ordering::Relaxed))
        );

        if capture.is_healthy() {
            continue;
        }

        state = PipelineState::Degraded;
        log::warn!("Capture stream stopped unexpectedly (state: {:?}), reinitializing...", state);
        let mut failures = 0u32;
        while running.load(Ordering::Relaxed) {
            capture.stop();
            match capture.start(buffer_callback(Arc::clone(&pipeline))) {
                Ok(()) => {
                    state = PipelineState::Running;
                    log::info!("Capture stream reinitialized");
                    break;
                }
                Err(err) => {
                    failures += 1;
                    log::error!("Stream reopen attempt {} failed: {:#}", failures, err);
                    if failures >= MAX_RECOVERY_ATTEMPTS {
                        capture.stop();
                        return Err(PipelineError::RecoveryExhausted(failures).into());
                    }
                    std::thread::sleep(poll);
                }
            }
        }
    }

    capture.stop();
    state = PipelineState::Stopped;
    log::info!("Audio processing stopped (state: {:?})", state);
    Ok(())
}
