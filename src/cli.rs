use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lumica", about = "Audio-reactive controller for WiZ smart lights")]
pub struct Cli {
    /// Configuration file (defaults to ./lumica.toml, then the platform config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Calibrate the silence threshold from live input, write it back, and exit
    #[arg(long)]
    pub calibrate: bool,

    /// Calibration duration in seconds
    #[arg(long, default_value_t = 5)]
    pub duration: u64,

    /// List capture devices and exit
    #[arg(long)]
    pub list_devices: bool,
}
