use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::clock::{Clock, MonotonicClock};
use super::{AnalyzerError, SpectrumSample};

/// Intervals shorter than this (over 500 BPM) never feed the tempo estimate.
const MIN_REALISTIC_INTERVAL_MS: f64 = 120.0;
/// Intervals longer than this (under 30 BPM) never feed the tempo estimate.
const MAX_REALISTIC_INTERVAL_MS: f64 = 2000.0;
/// Fewest recorded beats before a tempo is reported.
const MIN_BEATS_FOR_BPM: usize = 3;
/// Relative weight of the highest bass bin versus the lowest.
const TOP_BASS_BIN_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatDetectorConfig {
    /// Divides the standard-deviation multiplier: higher means weaker transients count.
    pub sensitivity: f32,
    /// Standard deviations above the mean energy a beat must reach.
    pub std_dev_multiplier: f32,
    /// Absolute energy floor, below which nothing is a beat.
    pub threshold: f32,
    pub min_beat_interval_ms: f64,
    /// Capacity of the energy ring buffer.
    pub history_size: usize,
    /// Energy samples needed before detection arms.
    pub min_history: usize,
    /// Lowest fraction of the spectrum treated as bass.
    pub bass_bin_fraction: f32,
    pub strength_cap: f32,
    /// Capacity of the accepted-beat log.
    pub beat_history_size: usize,
    /// Most recent intervals averaged into the tempo.
    pub bpm_window: usize,
    pub max_sample_value: f32,
}

impl Default for BeatDetectorConfig {
    fn default() -> Self {
        Self {
            sensitivity: 1.0,
            std_dev_multiplier: 1.5,
            threshold: 0.1,
            min_beat_interval_ms: 200.0,
            history_size: 43,
            min_history: 20,
            bass_bin_fraction: 0.15,
            strength_cap: 2.0,
            beat_history_size: 32,
            bpm_window: 8,
            max_sample_value: 255.0,
        }
    }
}

impl BeatDetectorConfig {
    pub fn validate(&self) -> Result<(), AnalyzerError> {
        let invalid = |name: &'static str, value: f64| AnalyzerError::InvalidSetting { name, value };

        if !(self.sensitivity > 0.0 && self.sensitivity.is_finite()) {
            return Err(invalid("beat.sensitivity", self.sensitivity as f64));
        }
        if !(self.std_dev_multiplier >= 0.0 && self.std_dev_multiplier.is_finite()) {
            return Err(invalid("beat.std_dev_multiplier", self.std_dev_multiplier as f64));
        }
        if !(0.0..1.0).contains(&self.threshold) {
            return Err(invalid("beat.threshold", self.threshold as f64));
        }
        if !(self.min_beat_interval_ms >= 0.0 && self.min_beat_interval_ms.is_finite()) {
            return Err(invalid("beat.min_beat_interval_ms", self.min_beat_interval_ms));
        }
        if self.history_size < 2 {
            return Err(invalid("beat.history_size", self.history_size as f64));
        }
        if self.min_history == 0 || self.min_history > self.history_size {
            return Err(invalid("beat.min_history", self.min_history as f64));
        }
        if !(self.bass_bin_fraction > 0.0 && self.bass_bin_fraction <= 1.0) {
            return Err(invalid("beat.bass_bin_fraction", self.bass_bin_fraction as f64));
        }
        if !(self.strength_cap >= 1.0 && self.strength_cap.is_finite()) {
            return Err(invalid("beat.strength_cap", self.strength_cap as f64));
        }
        if self.beat_history_size < MIN_BEATS_FOR_BPM {
            return Err(invalid("beat.beat_history_size", self.beat_history_size as f64));
        }
        if self.bpm_window < 2 {
            return Err(invalid("beat.bpm_window", self.bpm_window as f64));
        }
        if !(self.max_sample_value > 0.0 && self.max_sample_value.is_finite()) {
            return Err(invalid("beat.max_sample_value", self.max_sample_value as f64));
        }
        Ok(())
    }

    /// Effective standard-deviation multiplier after sensitivity scaling.
    pub fn threshold_multiplier(&self) -> f32 {
        self.std_dev_multiplier / self.sensitivity
    }
}

/// Partial update for [`BeatDetectorConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatConfigPatch {
    pub sensitivity: Option<f32>,
    pub std_dev_multiplier: Option<f32>,
    pub threshold: Option<f32>,
    pub min_beat_interval_ms: Option<f64>,
    pub history_size: Option<usize>,
    pub min_history: Option<usize>,
    pub bass_bin_fraction: Option<f32>,
    pub strength_cap: Option<f32>,
    pub beat_history_size: Option<usize>,
    pub bpm_window: Option<usize>,
    pub max_sample_value: Option<f32>,
}

impl BeatConfigPatch {
    fn apply_to(&self, config: &mut BeatDetectorConfig) {
        macro_rules! merge {
            ($($field:ident),*) => {
                $(if let Some(value) = self.$field {
                    config.$field = value;
                })*
            };
        }
        merge!(
            sensitivity,
            std_dev_multiplier,
            threshold,
            min_beat_interval_ms,
            history_size,
            min_history,
            bass_bin_fraction,
            strength_cap,
            beat_history_size,
            bpm_window,
            max_sample_value
        );
    }
}

/// Result of one detection tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    pub is_beat: bool,
    /// Bass energy of this tick, `[0,1]`.
    pub energy: f32,
    /// `energy / threshold`, capped. Zero unless `is_beat`.
    pub strength: f32,
    /// `strength` clamped to `[0,1]`.
    pub confidence: f32,
    pub threshold_used: f32,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatHistoryEntry {
    pub timestamp: f64,
    pub energy: f32,
    pub strength: f32,
    pub confidence: f32,
    /// Milliseconds since the previous recorded beat.
    pub interval_since_previous: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectorState {
    /// Not enough energy history to judge a beat.
    Warmup,
    /// Ready to accept the next beat.
    Armed,
    /// A beat fired less than the minimum interval ago.
    Cooldown,
}

/// Read-only diagnostic snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeatStats {
    pub beat_count: u64,
    pub average_strength: f32,
    pub average_confidence: f32,
    pub current_bpm: f32,
    pub energy_history_len: usize,
    pub config: BeatDetectorConfig,
}

/// Fixed-capacity ring of recent bass energies, overwritten oldest first.
#[derive(Debug, Clone)]
struct EnergyHistory {
    values: Vec<f32>,
    write: usize,
    len: usize,
}

impl EnergyHistory {
    fn new(capacity: usize) -> Self {
        Self {
            values: vec![0.0; capacity],
            write: 0,
            len: 0,
        }
    }

    fn push(&mut self, value: f32) {
        self.values[self.write] = value;
        self.write = (self.write + 1) % self.values.len();
        self.len = (self.len + 1).min(self.values.len());
    }

    fn len(&self) -> usize {
        self.len
    }

    fn clear(&mut self) {
        self.write = 0;
        self.len = 0;
    }

    fn filled(&self) -> &[f32] {
        if self.len < self.values.len() {
            &self.values[..self.len]
        } else {
            &self.values
        }
    }

    /// Population mean and standard deviation, accumulated in f64 so a flat
    /// history yields exactly its own value as the mean.
    fn mean_and_std_dev(&self) -> (f64, f64) {
        let values = self.filled();
        if values.is_empty() {
            return (0.0, 0.0);
        }
        let n = values.len() as f64;
        let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
        let variance = values.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
        (mean, variance.max(0.0).sqrt())
    }
}

/// Adaptive-threshold beat detector over the bass end of a magnitude spectrum.
///
/// Each tick pushes the bass energy into a ring buffer and compares it against
/// `mean + std_dev * multiplier`, floored by the configured absolute threshold.
/// A beat additionally requires the minimum interval since the last one.
pub struct BeatDetector<C: Clock = MonotonicClock> {
    config: BeatDetectorConfig,
    clock: C,
    energy_history: EnergyHistory,
    beat_history: VecDeque<BeatHistoryEntry>,
    last_beat_time: Option<f64>,
    beat_count: u64,
}

impl Default for BeatDetector {
    fn default() -> Self {
        Self::with_valid_config(BeatDetectorConfig::default(), MonotonicClock::new())
    }
}

impl BeatDetector {
    pub fn new(config: BeatDetectorConfig) -> Result<Self, AnalyzerError> {
        Self::with_clock(config, MonotonicClock::new())
    }
}

impl<C: Clock> BeatDetector<C> {
    pub fn with_clock(config: BeatDetectorConfig, clock: C) -> Result<Self, AnalyzerError> {
        config.validate()?;
        Ok(Self::with_valid_config(config, clock))
    }

    fn with_valid_config(config: BeatDetectorConfig, clock: C) -> Self {
        Self {
            energy_history: EnergyHistory::new(config.history_size),
            beat_history: VecDeque::with_capacity(config.beat_history_size),
            config,
            clock,
            last_beat_time: None,
            beat_count: 0,
        }
    }

    pub fn config(&self) -> &BeatDetectorConfig {
        &self.config
    }

    /// Runs one tick stamped with the injected clock.
    pub fn detect_beat<S: SpectrumSample>(&mut self, spectrum: &[S]) -> BeatEvent {
        let now = self.clock.now_ms();
        self.detect_beat_at(spectrum, now)
    }

    /// Runs one tick at an explicit time in milliseconds.
    pub fn detect_beat_at<S: SpectrumSample>(&mut self, spectrum: &[S], timestamp: f64) -> BeatEvent {
        let energy = self.bass_energy(spectrum);
        self.energy_history.push(energy);

        let mut event = BeatEvent {
            energy,
            timestamp,
            ..BeatEvent::default()
        };

        if self.energy_history.len() < self.config.min_history {
            return event;
        }

        let (mean, std_dev) = self.energy_history.mean_and_std_dev();
        let adaptive = mean + std_dev * self.config.threshold_multiplier() as f64;
        let threshold = (adaptive as f32).max(self.config.threshold);
        event.threshold_used = threshold;

        let above = energy > threshold && energy > self.config.threshold;
        if !above || !self.cooled_down(timestamp) {
            return event;
        }

        let strength = (energy / threshold.max(f32::EPSILON)).min(self.config.strength_cap);
        let confidence = strength.min(1.0);

        let interval_since_previous = self.beat_history.back().map(|last| timestamp - last.timestamp);
        if self.beat_history.len() >= self.config.beat_history_size {
            self.beat_history.pop_front();
        }
        self.beat_history.push_back(BeatHistoryEntry {
            timestamp,
            energy,
            strength,
            confidence,
            interval_since_previous,
        });
        self.last_beat_time = Some(timestamp);
        self.beat_count += 1;

        log::debug!(
            "Beat #{} at {:.1}ms: energy={:.3} threshold={:.3} strength={:.2}",
            self.beat_count,
            timestamp,
            energy,
            threshold,
            strength
        );

        event.is_beat = true;
        event.strength = strength;
        event.confidence = confidence;
        event
    }

    /// Average tempo over the most recent plausible intervals, or 0.
    pub fn calculate_bpm(&self) -> f32 {
        if self.beat_history.len() < MIN_BEATS_FOR_BPM {
            return 0.0;
        }

        let intervals: Vec<f64> = self
            .beat_history
            .iter()
            .filter_map(|entry| entry.interval_since_previous)
            .rev()
            .take(self.config.bpm_window)
            .filter(|&interval| {
                (MIN_REALISTIC_INTERVAL_MS..=MAX_REALISTIC_INTERVAL_MS).contains(&interval)
            })
            .collect();

        if intervals.len() < MIN_BEATS_FOR_BPM - 1 {
            return 0.0;
        }

        let average = intervals.iter().sum::<f64>() / intervals.len() as f64;
        (60_000.0 / average) as f32
    }

    /// Merges settings. A new `history_size` rebuilds and clears the energy
    /// buffer; the beat log is kept.
    pub fn update_config(&mut self, patch: &BeatConfigPatch) -> Result<(), AnalyzerError> {
        let mut candidate = self.config;
        patch.apply_to(&mut candidate);
        candidate.validate()?;

        if candidate.history_size != self.config.history_size {
            self.energy_history = EnergyHistory::new(candidate.history_size);
        }
        while self.beat_history.len() > candidate.beat_history_size {
            self.beat_history.pop_front();
        }
        self.config = candidate;
        log::info!("Beat detector config updated: {:?}", patch);

        Ok(())
    }

    /// Clears energy history, beat history and the cooldown.
    pub fn reset(&mut self) {
        self.energy_history.clear();
        self.beat_history.clear();
        self.last_beat_time = None;
        self.beat_count = 0;
        log::debug!("Beat detector reset");
    }

    pub fn get_stats(&self) -> BeatStats {
        let beats = self.beat_history.len();
        let (average_strength, average_confidence) = if beats == 0 {
            (0.0, 0.0)
        } else {
            let strength: f32 = self.beat_history.iter().map(|b| b.strength).sum();
            let confidence: f32 = self.beat_history.iter().map(|b| b.confidence).sum();
            (strength / beats as f32, confidence / beats as f32)
        };

        BeatStats {
            beat_count: self.beat_count,
            average_strength,
            average_confidence,
            current_bpm: self.calculate_bpm(),
            energy_history_len: self.energy_history.len(),
            config: self.config,
        }
    }

    pub fn beat_history(&self) -> impl Iterator<Item = &BeatHistoryEntry> {
        self.beat_history.iter()
    }

    pub fn last_beat_timestamp(&self) -> Option<f64> {
        self.last_beat_time
    }

    pub fn state(&self) -> DetectorState {
        if self.energy_history.len() < self.config.min_history {
            DetectorState::Warmup
        } else if self.cooled_down(self.clock.now_ms()) {
            DetectorState::Armed
        } else {
            DetectorState::Cooldown
        }
    }

    pub fn state_at(&self, timestamp: f64) -> DetectorState {
        if self.energy_history.len() < self.config.min_history {
            DetectorState::Warmup
        } else if self.cooled_down(timestamp) {
            DetectorState::Armed
        } else {
            DetectorState::Cooldown
        }
    }

    fn cooled_down(&self, now: f64) -> bool {
        match self.last_beat_time {
            Some(last) => now - last >= self.config.min_beat_interval_ms,
            None => true,
        }
    }

    /// Bass-weighted mean of the lowest bins, normalized to `[0,1]`.
    fn bass_energy<S: SpectrumSample>(&self, spectrum: &[S]) -> f32 {
        if spectrum.is_empty() {
            return 0.0;
        }

        let bass_bins = ((spectrum.len() as f32 * self.config.bass_bin_fraction).ceil() as usize)
            .clamp(1, spectrum.len());
        let max_value = self.config.max_sample_value;

        let mut weighted_sum = 0.0f32;
        let mut weight_total = 0.0f32;
        for (i, &sample) in spectrum[..bass_bins].iter().enumerate() {
            let position = if bass_bins > 1 {
                i as f32 / (bass_bins - 1) as f32
            } else {
                0.0
            };
            let weight = 1.0 - (1.0 - TOP_BASS_BIN_WEIGHT) * position;
            weighted_sum += sample.level(max_value) * weight;
            weight_total += weight;
        }

        (weighted_sum / weight_total).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::clock::ManualClock;

    const BINS: usize = 1024;
    const FRAME_MS: f64 = 1000.0 / 60.0;

    fn detector() -> BeatDetector {
        BeatDetector::default()
    }

    fn flat(value: u8) -> Vec<u8> {
        vec![value; BINS]
    }

    fn bass_hit() -> Vec<u8> {
        let mut spectrum = flat(50);
        for value in spectrum.iter_mut().take(BINS * 15 / 100 + 1) {
            *value = 255;
        }
        spectrum
    }

    /// Feeds `frames` flat frames starting at `start`, returning the next timestamp.
    fn warm_up(detector: &mut BeatDetector, frames: usize, start: f64) -> f64 {
        let mut now = start;
        for _ in 0..frames {
            let event = detector.detect_beat_at(&flat(50), now);
            assert!(!event.is_beat);
            now += FRAME_MS;
        }
        now
    }

    #[test]
    fn test_beat_after_warmup_then_cooldown() {
        let mut detector = detector();
        let now = warm_up(&mut detector, 20, 0.0);

        let beat = detector.detect_beat_at(&bass_hit(), now);
        assert!(beat.is_beat);
        assert!(beat.strength > 0.0);
        assert!(beat.confidence > 0.0 && beat.confidence <= 1.0);
        assert!(beat.strength <= 2.0);
        assert!((beat.energy - 1.0).abs() < 1e-6);

        let repeat = detector.detect_beat_at(&bass_hit(), now + FRAME_MS);
        assert!(!repeat.is_beat);
        assert_eq!(detector.state_at(now + FRAME_MS), DetectorState::Cooldown);
    }

    #[test]
    fn test_warmup_gate() {
        let mut detector = detector();
        let mut now = 0.0;
        for _ in 0..detector.config().min_history - 1 {
            let event = detector.detect_beat_at(&bass_hit(), now);
            assert!(!event.is_beat);
            assert_eq!(event.strength, 0.0);
            assert_eq!(event.confidence, 0.0);
            assert_eq!(detector.state_at(now), DetectorState::Warmup);
            now += 500.0;
        }
    }

    #[test]
    fn test_flat_signal_never_beats() {
        let mut detector = detector();
        for i in 0..200 {
            let event = detector.detect_beat_at(&flat(120), i as f64 * FRAME_MS);
            assert!(!event.is_beat);
        }
    }

    #[test]
    fn test_silence_stays_below_floor() {
        let mut detector = detector();
        let mut now = 0.0;
        for i in 0..100 {
            let value = if i % 10 == 0 { 20 } else { 0 };
            let event = detector.detect_beat_at(&flat(value), now);
            assert!(!event.is_beat, "near-silence should not beat (energy {})", event.energy);
            now += FRAME_MS;
        }
    }

    #[test]
    fn test_empty_and_malformed_spectra() {
        let mut detector = detector();
        let empty: [f32; 0] = [];
        let event = detector.detect_beat_at(&empty, 0.0);
        assert!(!event.is_beat);
        assert_eq!(event.energy, 0.0);

        let junk = [f32::NAN, f32::NEG_INFINITY, -3.0, f32::INFINITY];
        let event = detector.detect_beat_at(&junk, 10.0);
        assert!(event.energy.is_finite());
        assert!((0.0..=1.0).contains(&event.energy));
        assert_eq!(detector.get_stats().energy_history_len, 2);
    }

    #[test]
    fn test_cooldown_holds_across_stream() {
        let mut detector = detector();
        let min_interval = detector.config().min_beat_interval_ms;
        let mut last_beat: Option<f64> = None;

        for i in 0..600 {
            let now = i as f64 * FRAME_MS;
            // a double hit every 15 frames; the second lands inside the cooldown
            let spectrum = if i % 15 == 0 || i % 15 == 2 { bass_hit() } else { flat(40) };
            let event = detector.detect_beat_at(&spectrum, now);
            if event.is_beat {
                if let Some(previous) = last_beat {
                    assert!(now - previous >= min_interval);
                }
                last_beat = Some(now);
            }
        }
        assert!(last_beat.is_some());
    }

    #[test]
    fn test_bpm_from_steady_pulse() {
        let mut detector = detector();
        let mut now = warm_up(&mut detector, 20, 0.0);
        assert_eq!(detector.calculate_bpm(), 0.0);

        // 30 frames of ~16.67ms = 500ms per beat
        for frame in 0..300 {
            let spectrum = if frame % 30 == 0 { bass_hit() } else { flat(50) };
            detector.detect_beat_at(&spectrum, now);
            now += FRAME_MS;
        }

        let bpm = detector.calculate_bpm();
        assert!((bpm - 120.0).abs() < 0.5, "bpm {bpm}");
        assert!(detector.get_stats().beat_count >= 9);
    }

    #[test]
    fn test_bpm_needs_three_beats() {
        let mut detector = detector();
        let now = warm_up(&mut detector, 20, 0.0);
        assert!(detector.detect_beat_at(&bass_hit(), now).is_beat);
        warm_up(&mut detector, 5, now + 100.0);
        assert!(detector.detect_beat_at(&bass_hit(), now + 500.0).is_beat);
        assert_eq!(detector.calculate_bpm(), 0.0);
    }

    #[test]
    fn test_implausible_intervals_excluded_from_bpm_only() {
        let mut detector = BeatDetector::new(BeatDetectorConfig {
            min_beat_interval_ms: 50.0,
            ..BeatDetectorConfig::default()
        })
        .unwrap();

        let mut now = warm_up(&mut detector, 20, 0.0);
        let beat_times = [0.0, 500.0, 1000.0, 1080.0, 1500.0, 2000.0];
        for (i, &offset) in beat_times.iter().enumerate() {
            let target = now + offset;
            if i > 0 {
                detector.detect_beat_at(&flat(50), target - 40.0);
                detector.detect_beat_at(&flat(50), target - 20.0);
            }
            assert!(detector.detect_beat_at(&bass_hit(), target).is_beat, "offset {offset}");
        }
        now += 2000.0;

        assert_eq!(detector.beat_history().count(), beat_times.len());
        let bpm = detector.calculate_bpm();
        // 80ms interval dropped; 420ms and the 500ms gaps remain
        let expected = 60_000.0 / ((500.0 + 500.0 + 420.0 + 500.0) / 4.0);
        assert!((bpm as f64 - expected).abs() < 0.5, "bpm {bpm}, expected {expected}");
        assert_eq!(detector.last_beat_timestamp(), Some(now));
    }

    #[test]
    fn test_sensitivity_scales_detection() {
        let mut sensitive = BeatDetector::new(BeatDetectorConfig {
            sensitivity: 3.0,
            ..BeatDetectorConfig::default()
        })
        .unwrap();
        let mut dull = BeatDetector::new(BeatDetectorConfig {
            sensitivity: 0.2,
            ..BeatDetectorConfig::default()
        })
        .unwrap();

        let mut soft_hit = flat(50);
        for value in soft_hit.iter_mut().take(BINS / 5) {
            *value = 80;
        }

        let quiet = flat(50);
        let mut now = 0.0;
        let mut sensitive_beats = 0;
        let mut dull_beats = 0;
        for frame in 0..240 {
            let spectrum = if frame % 20 == 0 { &soft_hit } else { &quiet };
            if sensitive.detect_beat_at(spectrum, now).is_beat {
                sensitive_beats += 1;
            }
            if dull.detect_beat_at(spectrum, now).is_beat {
                dull_beats += 1;
            }
            now += FRAME_MS;
        }
        assert!(sensitive_beats > dull_beats);
        assert!(sensitive.config().threshold_multiplier() < dull.config().threshold_multiplier());
    }

    #[test]
    fn test_update_config_keeps_history_unless_resized() {
        let mut detector = detector();
        let now = warm_up(&mut detector, 25, 0.0);
        detector.detect_beat_at(&bass_hit(), now);

        detector
            .update_config(&BeatConfigPatch {
                sensitivity: Some(2.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(detector.get_stats().energy_history_len, 26);
        assert_eq!(detector.get_stats().beat_count, 1);

        detector
            .update_config(&BeatConfigPatch {
                history_size: Some(30),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(detector.get_stats().energy_history_len, 0);
        assert_eq!(detector.beat_history().count(), 1);

        let rejected = detector.update_config(&BeatConfigPatch {
            min_history: Some(100),
            ..Default::default()
        });
        assert!(rejected.is_err());
        assert_eq!(detector.config().min_history, 20);
    }

    #[test]
    fn test_energy_history_is_capacity_bounded() {
        let mut detector = detector();
        warm_up(&mut detector, 100, 0.0);
        assert_eq!(detector.get_stats().energy_history_len, 43);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut detector = detector();
        let now = warm_up(&mut detector, 20, 0.0);
        assert!(detector.detect_beat_at(&bass_hit(), now).is_beat);

        detector.reset();
        let stats = detector.get_stats();
        assert_eq!(stats.beat_count, 0);
        assert_eq!(stats.energy_history_len, 0);
        assert_eq!(detector.last_beat_timestamp(), None);
        assert_eq!(detector.state_at(now), DetectorState::Warmup);
    }

    #[test]
    fn test_stats_average_beats() {
        let mut detector = detector();
        let now = warm_up(&mut detector, 20, 0.0);
        let beat = detector.detect_beat_at(&bass_hit(), now);

        let stats = detector.get_stats();
        assert_eq!(stats.beat_count, 1);
        assert!((stats.average_strength - beat.strength).abs() < 1e-6);
        assert!((stats.average_confidence - beat.confidence).abs() < 1e-6);
        assert_eq!(stats.current_bpm, 0.0);
        assert_eq!(stats.config, BeatDetectorConfig::default());
    }

    #[test]
    fn test_manual_clock_drives_detect_beat() {
        let clock = ManualClock::new(0.0);
        let mut detector = BeatDetector::with_clock(BeatDetectorConfig::default(), &clock).unwrap();

        for _ in 0..20 {
            detector.detect_beat(&flat(50));
            clock.advance(FRAME_MS);
        }
        let beat = detector.detect_beat(&bass_hit());
        assert!(beat.is_beat);
        assert_eq!(beat.timestamp, clock.now_ms());

        clock.advance(FRAME_MS);
        assert!(!detector.detect_beat(&bass_hit()).is_beat);
        assert_eq!(detector.state(), DetectorState::Cooldown);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let mut first = detector();
        let mut second = detector();
        for frame in 0..200u32 {
            let value = ((frame * 37) % 200) as u8;
            let spectrum = flat(value);
            let now = frame as f64 * FRAME_MS;
            assert_eq!(first.detect_beat_at(&spectrum, now), second.detect_beat_at(&spectrum, now));
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(BeatDetector::new(BeatDetectorConfig {
            sensitivity: 0.0,
            ..BeatDetectorConfig::default()
        })
        .is_err());
        assert!(BeatDetector::new(BeatDetectorConfig {
            history_size: 1,
            min_history: 1,
            ..BeatDetectorConfig::default()
        })
        .is_err());
    }
}
