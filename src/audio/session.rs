use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{AnalysisFrame, BeatDetector, FrequencyAnalyzer, SpectrumCapture};

/// Aggregate view of a replayed recording.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub frame_count: usize,
    pub duration_seconds: f64,

    /// Highest normalized level each band reached
    pub peak_levels: BTreeMap<String, f32>,
    pub peak_energy: f32,
    pub peak_flux: f32,

    pub total_beats: u32,
    pub average_bpm: f32,
    pub bpm_range: (f32, f32),

    /// Number of ticks each band was the dominant one
    pub dominant_band_counts: BTreeMap<String, u32>,
    /// Mean share of raw energy per band over non-silent ticks
    pub average_distribution: BTreeMap<String, f32>,
    pub energy_profile: String, // "Silent", "Bass-Heavy", "Treble-Focused", "Balanced"
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub sample_rate: f32,
    pub bin_count: usize,
    pub frame_rate: f32,
    pub frames: Option<Vec<AnalysisFrame>>,
    pub statistics: SessionStatistics,
}

impl SessionReport {
    pub fn save<P: AsRef<Path>>(&self, output_path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(output_path, json)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(input_path: P) -> Result<Self> {
        let json = std::fs::read_to_string(input_path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Replays recorded spectra through an analyzer and beat detector at a fixed
/// frame rate, stamping every tick from the frame index rather than wall time.
pub struct AnalysisSession {
    analyzer: FrequencyAnalyzer,
    detector: BeatDetector,
    frame_rate: f32,
    keep_frames: bool,
}

#[derive(Default)]
struct Accumulator {
    stats: SessionStatistics,
    bpm_values: Vec<f32>,
    distribution_sums: BTreeMap<String, f32>,
    voiced_frames: u32,
}

impl Accumulator {
    fn observe(&mut self, frame: &AnalysisFrame) {
        let stats = &mut self.stats;
        stats.frame_count += 1;

        for (name, level) in &frame.analysis.bands {
            let peak = stats.peak_levels.entry(name.clone()).or_insert(0.0);
            *peak = peak.max(level.normalized);
        }

        let metrics = &frame.analysis.metrics;
        stats.peak_energy = stats.peak_energy.max(metrics.overall_energy);
        stats.peak_flux = stats.peak_flux.max(metrics.flux);

        if let Some(band) = &metrics.dominant_band {
            *stats.dominant_band_counts.entry(band.clone()).or_insert(0) += 1;
            self.voiced_frames += 1;
            for (name, share) in &metrics.energy_distribution {
                *self.distribution_sums.entry(name.clone()).or_insert(0.0) += share;
            }
        }

        if frame.beat.is_beat {
            stats.total_beats += 1;
        }
        if frame.bpm > 0.0 {
            self.bpm_values.push(frame.bpm);
        }
    }

    fn finish(mut self, frame_rate: f32) -> SessionStatistics {
        let stats = &mut self.stats;
        stats.duration_seconds = stats.frame_count as f64 / frame_rate as f64;

        if !self.bpm_values.is_empty() {
            stats.average_bpm = self.bpm_values.iter().sum::<f32>() / self.bpm_values.len() as f32;
            stats.bpm_range = (
                self.bpm_values.iter().fold(f32::INFINITY, |a, &b| a.min(b)),
                self.bpm_values.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b)),
            );
        }

        if self.voiced_frames > 0 {
            let voiced = self.voiced_frames as f32;
            stats.average_distribution = self
                .distribution_sums
                .into_iter()
                .map(|(name, sum)| (name, sum / voiced))
                .collect();
        }

        stats.energy_profile = classify(&stats.average_distribution).to_string();
        self.stats
    }
}

fn classify(distribution: &BTreeMap<String, f32>) -> &'static str {
    if distribution.is_empty() {
        return "Silent";
    }
    let share = |name: &str| distribution.get(name).copied().unwrap_or(0.0);

    if share("bass") > 0.5 {
        "Bass-Heavy"
    } else if share("treble") > 0.4 {
        "Treble-Focused"
    } else {
        "Balanced"
    }
}

impl AnalysisSession {
    /// Initializes `analyzer` for the given geometry and takes ownership of both stages.
    pub fn new(
        mut analyzer: FrequencyAnalyzer,
        detector: BeatDetector,
        sample_rate: f32,
        bin_count: usize,
        frame_rate: f32,
    ) -> Result<Self> {
        if !(frame_rate > 0.0 && frame_rate.is_finite()) {
            anyhow::bail!("Invalid frame rate: {}", frame_rate);
        }
        analyzer.initialize(sample_rate, bin_count)?;

        Ok(Self {
            analyzer,
            detector,
            frame_rate,
            keep_frames: false,
        })
    }

    pub fn for_capture(
        analyzer: FrequencyAnalyzer,
        detector: BeatDetector,
        capture: &SpectrumCapture,
    ) -> Result<Self> {
        Self::new(
            analyzer,
            detector,
            capture.sample_rate() as f32,
            capture.bin_count(),
            capture.frame_rate(),
        )
    }

    /// Keep every per-tick frame in the report, not just the statistics.
    pub fn keep_frames(mut self, keep: bool) -> Self {
        self.keep_frames = keep;
        self
    }

    pub fn analyzer(&self) -> &FrequencyAnalyzer {
        &self.analyzer
    }

    pub fn detector(&self) -> &BeatDetector {
        &self.detector
    }

    pub fn run<'a, I>(&mut self, frames: I) -> Result<SessionReport>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let frame_duration_ms = 1000.0 / self.frame_rate as f64;
        let mut kept = self.keep_frames.then(Vec::new);
        let mut accumulator = Accumulator::default();

        for (index, bins) in frames.into_iter().enumerate() {
            let timestamp_ms = index as f64 * frame_duration_ms;
            let analysis = self.analyzer.analyze(bins)?;
            let beat = self.detector.detect_beat_at(bins, timestamp_ms);
            let bpm = self.detector.calculate_bpm();

            let frame = AnalysisFrame {
                timestamp_ms,
                analysis,
                beat,
                bpm,
            };
            accumulator.observe(&frame);

            if accumulator.stats.frame_count % 1000 == 0 {
                info!(
                    "Replayed {} frames ({:.1}s)",
                    accumulator.stats.frame_count,
                    timestamp_ms / 1000.0
                );
            }

            if let Some(kept) = kept.as_mut() {
                kept.push(frame);
            }
        }

        let statistics = accumulator.finish(self.frame_rate);
        info!(
            "Session complete: {} frames, {} beats, {:.1} BPM average, profile {}",
            statistics.frame_count, statistics.total_beats, statistics.average_bpm, statistics.energy_profile
        );

        Ok(SessionReport {
            sample_rate: self.analyzer.sample_rate().unwrap_or_default(),
            bin_count: self.analyzer.bin_count().unwrap_or_default(),
            frame_rate: self.frame_rate,
            frames: kept,
            statistics,
        })
    }

    pub fn run_capture(&mut self, capture: &SpectrumCapture) -> Result<SessionReport> {
        self.run(capture.frames().iter().map(Vec::as_slice))
    }
}
