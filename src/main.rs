mod audio;
mod cli;
mod config;
mod light;
mod pipeline;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use audio::capture::{AudioCapture, CaptureSettings};
use cli::Cli;
use config::Config;
use light::transport::UdpTransport;
use pipeline::Pipeline;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        println!("Available capture devices:");
        for name in AudioCapture::list_input_devices()? {
            println!("  {}", name);
        }
        return Ok(());
    }

    let config_path = config::resolve_path(cli.config.clone()).context(
        "No config file found (looked for ./lumica.toml and the platform config dir; \
         pass --config)",
    )?;
    let config = Config::load(&config_path)?;
    log::info!("Loaded config from {}", config_path.display());

    if cli.calibrate {
        log::info!("Calibration duration set to: {} seconds", cli.duration);
        let threshold = audio::calibrate::run(&config, cli.duration)?;
        let mut updated = config;
        updated.advanced.silence_threshold = threshold;
        updated.save(&config_path)?;
        log::info!(
            "Wrote silence threshold {:.2} back to {}",
            threshold,
            config_path.display()
        );
        return Ok(());
    }

    log::info!(
        "lumica - {} fixture(s), {} Hz, {}-sample buffers",
        config.fixtures.len(),
        config.advanced.sample_rate,
        config.advanced.frames_per_buffer
    );

    let settings = CaptureSettings {
        device_name: config.audio_device.clone(),
        sample_rate: config.advanced.sample_rate,
        channels: config.advanced.channels as u16,
        frames_per_buffer: config.advanced.frames_per_buffer as u32,
    };

    let transport = UdpTransport::new().context("Failed to open UDP socket")?;
    let peak_magnitude = Arc::new(AtomicU32::new(0));
    let pipeline = Arc::new(Mutex::new(Pipeline::new(
        &config,
        transport,
        Arc::clone(&peak_magnitude),
    )));

    let running = Arc::new(AtomicBool::new(true));
    let supervisor = {
        let pipeline = Arc::clone(&pipeline);
        let running = Arc::clone(&running);
        let peak_magnitude = Arc::clone(&peak_magnitude);
        std::thread::spawn(move || pipeline::run_supervised(settings, pipeline, running, peak_magnitude))
    };

    println!("Press Enter to stop...");
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);

    running.store(false, Ordering::Relaxed);
    match supervisor.join() {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("Supervisor thread panicked"),
    }

    log::info!("Done");
    Ok(())
}
