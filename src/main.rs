use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use std::path::Path;

use flux_analysis::audio::spectrum_source::{capture_from_samples, load_wav_mono};
use flux_analysis::audio::{
    AnalysisSession, BeatConfigPatch, SessionReport, SpectrumCapture, SpectrumScaling,
};
use flux_analysis::FluxConfig;

#[derive(Parser)]
#[command(name = "flux-analyzer")]
#[command(about = "Analyze a WAV file or spectrum capture and report bands, beats and tempo")]
struct Args {
    /// WAV file or .flxc spectrum capture
    #[arg()]
    input_file: String,

    /// JSON configuration file (analyzer + beat settings)
    #[arg(short, long)]
    config: Option<String>,

    /// Write the session report as JSON
    #[arg(short, long)]
    output: Option<String>,

    /// Include every analyzed frame in the JSON report
    #[arg(long)]
    frame_by_frame: bool,

    /// FFT size used when converting WAV input
    #[arg(long, default_value = "2048")]
    fft_size: usize,

    /// Spectra per second when converting WAV input
    #[arg(long, default_value = "60")]
    frame_rate: f32,

    /// Override beat sensitivity from the configuration
    #[arg(long)]
    sensitivity: Option<f32>,
}

fn load_input(args: &Args) -> Result<SpectrumCapture> {
    let path = Path::new(&args.input_file);
    let is_capture = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("flxc"))
        .unwrap_or(false);

    if is_capture {
        info!("Loading spectrum capture: {}", args.input_file);
        return SpectrumCapture::load(path);
    }

    info!("Loading WAV file: {}", args.input_file);
    let (samples, sample_rate) = load_wav_mono(path)?;
    if samples.len() < args.fft_size {
        warn!(
            "Input holds {} samples, fewer than one FFT window of {}",
            samples.len(),
            args.fft_size
        );
    }
    capture_from_samples(
        &samples,
        sample_rate,
        args.fft_size,
        args.frame_rate,
        SpectrumScaling::default(),
    )
}

fn print_report(report: &SessionReport) {
    let stats = &report.statistics;

    info!("=== ANALYSIS RESULTS ===");
    info!("Duration: {:.2} seconds", stats.duration_seconds);
    info!("Frames: {} at {:.1} Hz", stats.frame_count, report.frame_rate);
    info!("Total beats detected: {}", stats.total_beats);
    info!("Average BPM: {:.1}", stats.average_bpm);
    info!("BPM range: {:.1} - {:.1}", stats.bpm_range.0, stats.bpm_range.1);
    info!("Energy profile: {}", stats.energy_profile);

    info!("=== BANDS ===");
    for (name, peak) in &stats.peak_levels {
        let share = stats.average_distribution.get(name).copied().unwrap_or(0.0);
        let dominant = stats.dominant_band_counts.get(name).copied().unwrap_or(0);
        info!(
            "{:>12}: peak {:.3}, energy share {:5.1}%, dominant in {} frames",
            name,
            peak,
            share * 100.0,
            dominant
        );
    }
    info!("Peak energy: {:.4}", stats.peak_energy);
    info!("Peak spectral flux: {:.4}", stats.peak_flux);
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => FluxConfig::load(path)?,
        None => FluxConfig::default(),
    };

    let mut detector = config.build_detector()?;
    if let Some(sensitivity) = args.sensitivity {
        let patch = BeatConfigPatch {
            sensitivity: Some(sensitivity),
            ..BeatConfigPatch::default()
        };
        if let Err(e) = detector.update_config(&patch) {
            warn!("Ignoring --sensitivity: {}", e);
        }
    }

    let capture = load_input(&args)?;
    info!(
        "Input: {} frames, {} bins, {} Hz sample rate",
        capture.frame_count(),
        capture.bin_count(),
        capture.sample_rate()
    );

    let mut session =
        AnalysisSession::for_capture(config.build_analyzer()?, detector, &capture)?
            .keep_frames(args.frame_by_frame);
    let report = session.run_capture(&capture)?;

    print_report(&report);

    if let Some(output) = &args.output {
        report.save(output)?;
        let size = std::fs::metadata(output)?.len();
        info!("Report saved to {} ({:.1} KB)", output, size as f64 / 1024.0);
    }

    Ok(())
}
