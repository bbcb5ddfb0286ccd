//! cpal input stream management: device lookup by name, stream
//! construction with the configured parameters, and health reporting for
//! the supervisor's recovery loop.

use anyhow::{bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub device_name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub frames_per_buffer: u32,
}

pub struct AudioCapture {
    device: cpal::Device,
    stream_config: cpal::StreamConfig,
    stream: Option<cpal::Stream>,
    failed: Arc<AtomicBool>,
}

impl AudioCapture {
    /// Looks up the configured device by exact name. The stream is not
    /// started yet; `start` builds and plays it.
    pub fn open(settings: &CaptureSettings) -> Result<Self> {
        let host = cpal::default_host();
        let mut device = None;
        for candidate in host.input_devices().context("Failed to enumerate input devices")? {
            if candidate.name().map(|n| n == settings.device_name).unwrap_or(false) {
                device = Some(candidate);
                break;
            }
        }
        let Some(device) = device else {
            bail!(
                "Audio device '{}' not found (use --list-devices to see candidates)",
                settings.device_name
            );
        };
        log::info!("Using audio device: {}", settings.device_name);

        let stream_config = cpal::StreamConfig {
            channels: settings.channels,
            sample_rate: cpal::SampleRate(settings.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(settings.frames_per_buffer),
        };

        Ok(Self {
            device,
            stream_config,
            stream: None,
            failed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Builds and plays the input stream. `on_buffer` runs on the audio
    /// callback context once per buffer of interleaved f32 samples.
    pub fn start(&mut self, mut on_buffer: impl FnMut(&[f32]) + Send + 'static) -> Result<()> {
        self.failed.store(false, Ordering::Relaxed);
        let failed = Arc::clone(&self.failed);

        let stream = self
            .device
            .build_input_stream(
                &self.stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| on_buffer(data),
                move |err| {
                    log::error!("Audio stream error: {}", err);
                    failed.store(true, Ordering::Relaxed);
                },
                None,
            )
            .context("Failed to build input stream")?;
        stream.play().context("Failed to start input stream")?;

        self.stream = Some(stream);
        Ok(())
    }

    /// Stops and releases the current stream, if any.
    pub fn stop(&mut self) {
        self.stream = None;
    }

    pub fn is_healthy(&self) -> bool {
        self.stream.is_some() && !self.failed.load(Ordering::Relaxed)
    }

    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let mut names = Vec::new();
        for device in host.input_devices().context("Failed to enumerate input devices")? {
            if let Ok(name) = device.name() {
                names.push(name);
            }
        }
        Ok(names)
    }
}
