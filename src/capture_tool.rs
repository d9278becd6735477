use anyhow::Result;
use clap::Parser;
use log::{info, warn};

use flux_analysis::audio::spectrum_source::{capture_from_samples, load_wav_mono};
use flux_analysis::audio::SpectrumScaling;

#[derive(Parser)]
#[command(name = "capture-tool")]
#[command(about = "Convert a WAV file into a .flxc spectrum capture for offline replay")]
struct Args {
    /// WAV file to convert
    #[arg()]
    input_file: String,

    /// Output capture file
    #[arg(short, long, default_value = "capture.flxc")]
    output: String,

    /// FFT size (bins per spectrum is half of this)
    #[arg(long, default_value = "2048")]
    fft_size: usize,

    /// Spectra per second
    #[arg(long, default_value = "60")]
    frame_rate: f32,

    /// Magnitude mapped to byte 0
    #[arg(long, default_value = "-100", allow_hyphen_values = true)]
    min_decibels: f32,

    /// Magnitude mapped to byte 255
    #[arg(long, default_value = "-30", allow_hyphen_values = true)]
    max_decibels: f32,

    /// Weight of the previous spectrum when smoothing over time
    #[arg(long, default_value = "0.8")]
    smoothing: f32,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("Input file: {}", args.input_file);
    info!("FFT size: {}, frame rate: {:.1} Hz", args.fft_size, args.frame_rate);

    let (samples, sample_rate) = load_wav_mono(&args.input_file)?;
    info!(
        "Loaded {} samples ({:.2}s) at {} Hz",
        samples.len(),
        samples.len() as f64 / sample_rate as f64,
        sample_rate
    );

    let scaling = SpectrumScaling {
        min_decibels: args.min_decibels,
        max_decibels: args.max_decibels,
        smoothing_time_constant: args.smoothing,
    };
    let capture = capture_from_samples(&samples, sample_rate, args.fft_size, args.frame_rate, scaling)?;

    if capture.frame_count() == 0 {
        warn!("Input is shorter than one FFT window; capture holds no frames");
    }

    capture.save(&args.output)?;
    let size = std::fs::metadata(&args.output)?.len();
    info!(
        "Saved {} spectra to {} ({:.1} KB)",
        capture.frame_count(),
        args.output,
        size as f64 / 1024.0
    );

    Ok(())
}
