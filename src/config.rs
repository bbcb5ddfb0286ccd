use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::light::color::Rgb;

/// Immutable settings snapshot, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Capture device name, matched exactly against cpal's device list.
    pub audio_device: String,
    #[serde(default)]
    pub advanced: Advanced,
    pub fixtures: Vec<FixtureConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advanced {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_frames_per_buffer")]
    pub frames_per_buffer: usize,
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    #[serde(default = "default_min_update_interval_ms")]
    pub min_update_interval_ms: u64,
    /// Minimum Hz delta between buffers for a frequency update to fire.
    #[serde(default = "default_frequency_change_threshold")]
    pub frequency_change_threshold: f32,
    /// Seed for the rolling energy threshold before the window fills.
    #[serde(default)]
    pub dynamic_threshold: f32,
    #[serde(default = "default_brightness")]
    pub target_brightness: i32,
    #[serde(default = "default_brightness")]
    pub current_brightness: i32,
    /// Buffers to suppress beat re-firing after an event. 0 disables.
    #[serde(default)]
    pub hysteresis_cooldown: u32,
    #[serde(default = "default_recent_energies_size")]
    pub recent_energies_size: usize,
    #[serde(default = "default_sensitivity_multiplier")]
    pub sensitivity_multiplier: f32,
    #[serde(default = "default_brightness_multiplier")]
    pub brightness_multiplier: f32,
    #[serde(default = "default_off_effect_delay_ms")]
    pub off_effect_delay_ms: u64,
    #[serde(default = "default_true")]
    pub gradual_brightness_recovery: bool,
    #[serde(default = "default_true")]
    pub enable_silence_gate: bool,
    /// Starting silence floor, written back by `--calibrate`.
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f32,
    #[serde(default)]
    pub apply_smooth_transition: bool,
    /// When set, repeated colors cycle through the palette instead of
    /// resending identically.
    #[serde(default)]
    pub effects_enabled: bool,
    /// Target RMS for level normalization, in i16 sample scale.
    #[serde(default = "default_target_rms")]
    pub target_rms: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureConfig {
    pub ip: IpAddr,
    pub effect: Effect,
    pub colors: Vec<Rgb>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    ChangeColor,
    AdjustBrightness,
    TurnOffOn,
}

impl Default for Advanced {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            frames_per_buffer: default_frames_per_buffer(),
            channels: default_channels(),
            udp_port: default_udp_port(),
            min_update_interval_ms: default_min_update_interval_ms(),
            frequency_change_threshold: default_frequency_change_threshold(),
            dynamic_threshold: 0.0,
            target_brightness: default_brightness(),
            current_brightness: default_brightness(),
            hysteresis_cooldown: 0,
            recent_energies_size: default_recent_energies_size(),
            sensitivity_multiplier: default_sensitivity_multiplier(),
            brightness_multiplier: default_brightness_multiplier(),
            off_effect_delay_ms: default_off_effect_delay_ms(),
            gradual_brightness_recovery: true,
            enable_silence_gate: true,
            silence_threshold: default_silence_threshold(),
            apply_smooth_transition: false,
            effects_enabled: false,
            target_rms: default_target_rms(),
        }
    }
}

fn default_sample_rate() -> u32 { 44100 }
fn default_frames_per_buffer() -> usize { 1024 }
fn default_channels() -> usize { 2 }
fn default_udp_port() -> u16 { 38899 }
fn default_min_update_interval_ms() -> u64 { 100 }
fn default_frequency_change_threshold() -> f32 { 0.5 }
fn default_brightness() -> i32 { 255 }
fn default_recent_energies_size() -> usize { 10 }
fn default_sensitivity_multiplier() -> f32 { 1.0 }
fn default_brightness_multiplier() -> f32 { 5.0 }
fn default_off_effect_delay_ms() -> u64 { 100 }
fn default_silence_threshold() -> f32 { 0.02 }
fn default_target_rms() -> f32 { 10000.0 }
fn default_true() -> bool { true }

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.audio_device.is_empty() {
            bail!("audio_device must not be empty");
        }
        if self.fixtures.is_empty() {
            bail!("at least one fixture must be configured");
        }
        for fixture in &self.fixtures {
            if fixture.colors.is_empty() {
                bail!("fixture {} has an empty palette", fixture.ip);
            }
        }
        let adv = &self.advanced;
        if adv.frames_per_buffer == 0 || !adv.frames_per_buffer.is_power_of_two() {
            bail!("frames_per_buffer must be a nonzero power of two");
        }
        if adv.channels == 0 {
            bail!("channels must be at least 1");
        }
        if adv.sample_rate == 0 {
            bail!("sample_rate must be nonzero");
        }
        if adv.recent_energies_size == 0 {
            bail!("recent_energies_size must be at least 1");
        }
        Ok(())
    }
}

/// Resolve the config path: explicit CLI path, `lumica.toml` in the working
/// directory, then the platform config dir.
pub fn resolve_path(cli_path: Option<PathBuf>) -> Option<PathBuf> {
    if cli_path.is_some() {
        return cli_path;
    }
    let local = PathBuf::from("lumica.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("lumica").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}
