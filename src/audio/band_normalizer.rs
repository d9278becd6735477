use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::AnalyzerError;

/// Floor for every divisor used while normalizing.
const EPSILON: f32 = 1e-4;

/// Weight of the newest output in the adaptive normalizer's running average.
const ADAPTIVE_AVERAGE_RATE: f32 = 0.05;

/// Exponential smoothing across ticks. Higher `factor` responds more slowly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingSettings {
    pub enabled: bool,
    pub factor: f32,
}

impl Default for SmoothingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            factor: 0.8,
        }
    }
}

impl SmoothingSettings {
    pub fn validate(&self) -> Result<(), AnalyzerError> {
        if !(0.0..1.0).contains(&self.factor) {
            return Err(AnalyzerError::InvalidSetting {
                name: "smoothing.factor",
                value: self.factor as f64,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationMethod {
    /// Divide by a decaying per-band peak.
    Peak,
    /// Scale by the RMS of a rolling window of raw levels.
    Rms,
    /// Slowly adjusted gain steering the output toward a target level.
    Adaptive,
    /// Pass the smoothed level through untouched.
    None,
}

/// Tuning for every normalization method. Only the fields of the active
/// method are consulted on a given tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationSettings {
    pub method: NormalizationMethod,
    /// Per-tick multiplicative decay of the tracked peak.
    pub peak_decay: f32,
    /// Number of recent raw levels in the RMS window.
    pub rms_window: usize,
    /// Output level a signal sitting exactly at its RMS maps to.
    pub rms_target: f32,
    pub adaptive_target: f32,
    pub adaptive_rate: f32,
    pub min_gain: f32,
    pub max_gain: f32,
}

impl Default for NormalizationSettings {
    fn default() -> Self {
        Self {
            method: NormalizationMethod::Peak,
            peak_decay: 0.995,
            rms_window: 43,
            rms_target: 0.5,
            adaptive_target: 0.5,
            adaptive_rate: 0.01,
            min_gain: 0.5,
            max_gain: 8.0,
        }
    }
}

impl NormalizationSettings {
    pub fn validate(&self) -> Result<(), AnalyzerError> {
        let invalid = |name: &'static str, value: f64| AnalyzerError::InvalidSetting { name, value };

        if !(self.peak_decay > 0.0 && self.peak_decay <= 1.0) {
            return Err(invalid("normalization.peak_decay", self.peak_decay as f64));
        }
        if self.rms_window == 0 {
            return Err(invalid("normalization.rms_window", 0.0));
        }
        if !(self.rms_target > 0.0 && self.rms_target <= 1.0) {
            return Err(invalid("normalization.rms_target", self.rms_target as f64));
        }
        if !(self.adaptive_target > 0.0 && self.adaptive_target <= 1.0) {
            return Err(invalid("normalization.adaptive_target", self.adaptive_target as f64));
        }
        if !(self.adaptive_rate > 0.0 && self.adaptive_rate < 1.0) {
            return Err(invalid("normalization.adaptive_rate", self.adaptive_rate as f64));
        }
        if !(self.min_gain > 0.0 && self.min_gain <= self.max_gain && self.max_gain.is_finite()) {
            return Err(invalid("normalization.min_gain", self.min_gain as f64));
        }
        Ok(())
    }
}

/// Output of one band for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NormalizedLevel {
    pub smoothed: f32,
    pub normalized: f32,
}

/// Smoothing and normalization state for a single band.
///
/// State persists across ticks and is cleared by `reset`.
#[derive(Debug, Clone)]
pub struct BandNormalizer {
    smoothed: f32,
    peak: f32,
    rms_levels: VecDeque<f32>,
    gain: f32,
    average_output: f32,
}

impl Default for BandNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl BandNormalizer {
    pub fn new() -> Self {
        Self {
            smoothed: 0.0,
            peak: EPSILON,
            rms_levels: VecDeque::new(),
            gain: 1.0,
            average_output: 0.0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn smoothed(&self) -> f32 {
        self.smoothed
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Folds one raw level (already in `[0,1]`) into the band state.
    pub fn process(
        &mut self,
        raw: f32,
        smoothing: &SmoothingSettings,
        normalization: &NormalizationSettings,
    ) -> NormalizedLevel {
        let raw = if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 };

        self.smoothed = if smoothing.enabled {
            let factor = smoothing.factor;
            (self.smoothed * factor + raw * (1.0 - factor)).clamp(0.0, 1.0)
        } else {
            raw
        };

        let normalized = match normalization.method {
            NormalizationMethod::Peak => self.normalize_peak(normalization.peak_decay),
            NormalizationMethod::Rms => self.normalize_rms(raw, normalization),
            NormalizationMethod::Adaptive => self.normalize_adaptive(normalization),
            NormalizationMethod::None => self.smoothed,
        };

        NormalizedLevel {
            smoothed: self.smoothed,
            normalized: normalized.clamp(0.0, 1.0),
        }
    }

    fn normalize_peak(&mut self, decay: f32) -> f32 {
        self.peak = (self.peak * decay).max(self.smoothed).max(EPSILON);
        self.smoothed / self.peak
    }

    fn normalize_rms(&mut self, raw: f32, settings: &NormalizationSettings) -> f32 {
        self.rms_levels.push_back(raw);
        while self.rms_levels.len() > settings.rms_window {
            self.rms_levels.pop_front();
        }

        let mean_square =
            self.rms_levels.iter().map(|v| v * v).sum::<f32>() / self.rms_levels.len() as f32;
        let rms = mean_square.sqrt().max(EPSILON);

        self.smoothed / rms * settings.rms_target
    }

    fn normalize_adaptive(&mut self, settings: &NormalizationSettings) -> f32 {
        let output = (self.smoothed * self.gain).clamp(0.0, 1.0);

        self.average_output = self.average_output * (1.0 - ADAPTIVE_AVERAGE_RATE)
            + output * ADAPTIVE_AVERAGE_RATE;

        if self.average_output < settings.adaptive_target {
            self.gain *= 1.0 + settings.adaptive_rate;
        } else if self.average_output > settings.adaptive_target {
            self.gain *= 1.0 - settings.adaptive_rate;
        }
        self.gain = self.gain.clamp(settings.min_gain, settings.max_gain);

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(method: NormalizationMethod) -> NormalizationSettings {
        NormalizationSettings {
            method,
            ..NormalizationSettings::default()
        }
    }

    #[test]
    fn test_smoothing_moves_monotonically_without_overshoot() {
        let mut band = BandNormalizer::new();
        let smoothing = SmoothingSettings::default();
        let none = settings(NormalizationMethod::None);

        let mut previous = 0.0;
        for _ in 0..200 {
            let level = band.process(0.6, &smoothing, &none);
            assert!(level.smoothed >= previous - 1e-6);
            assert!(level.smoothed <= 0.6 + 1e-6);
            previous = level.smoothed;
        }
        assert!((previous - 0.6).abs() < 1e-3);

        for _ in 0..200 {
            let level = band.process(0.1, &smoothing, &none);
            assert!(level.smoothed <= previous + 1e-6);
            assert!(level.smoothed >= 0.1 - 1e-6);
            previous = level.smoothed;
        }
    }

    #[test]
    fn test_disabled_smoothing_passes_raw_through() {
        let mut band = BandNormalizer::new();
        let smoothing = SmoothingSettings {
            enabled: false,
            factor: 0.9,
        };
        let level = band.process(0.42, &smoothing, &settings(NormalizationMethod::None));
        assert_eq!(level.smoothed, 0.42);
        assert_eq!(level.normalized, 0.42);
    }

    #[test]
    fn test_peak_normalization_recovers_after_transient() {
        let mut band = BandNormalizer::new();
        let smoothing = SmoothingSettings {
            enabled: false,
            factor: 0.0,
        };
        let peak = settings(NormalizationMethod::Peak);

        let loud = band.process(1.0, &smoothing, &peak);
        assert_eq!(loud.normalized, 1.0);

        let quiet_first = band.process(0.2, &smoothing, &peak).normalized;
        assert!((quiet_first - 0.2 / 0.995).abs() < 1e-3);

        let mut quiet_last = quiet_first;
        for _ in 0..2000 {
            quiet_last = band.process(0.2, &smoothing, &peak).normalized;
        }
        assert!(quiet_last > 0.99, "peak should have decayed, got {quiet_last}");
    }

    #[test]
    fn test_peak_normalization_of_silence_is_zero() {
        let mut band = BandNormalizer::new();
        let level = band.process(0.0, &SmoothingSettings::default(), &settings(NormalizationMethod::Peak));
        assert_eq!(level.normalized, 0.0);
    }

    #[test]
    fn test_rms_normalization_centres_steady_signal() {
        let mut band = BandNormalizer::new();
        let smoothing = SmoothingSettings {
            enabled: false,
            factor: 0.0,
        };
        let rms = settings(NormalizationMethod::Rms);

        let mut level = 0.0;
        for _ in 0..100 {
            level = band.process(0.05, &smoothing, &rms).normalized;
        }
        assert!((level - 0.5).abs() < 1e-3);

        let burst = band.process(0.3, &smoothing, &rms).normalized;
        assert_eq!(burst, 1.0);
    }

    #[test]
    fn test_adaptive_gain_is_bounded() {
        let mut band = BandNormalizer::new();
        let smoothing = SmoothingSettings::default();
        let adaptive = settings(NormalizationMethod::Adaptive);

        for _ in 0..5000 {
            band.process(0.0, &smoothing, &adaptive);
        }
        assert!((band.gain() - adaptive.max_gain).abs() < 1e-3);

        for _ in 0..5000 {
            band.process(1.0, &smoothing, &adaptive);
        }
        assert!((band.gain() - adaptive.min_gain).abs() < 1e-3);
    }

    #[test]
    fn test_adaptive_gain_lifts_quiet_signal() {
        let mut band = BandNormalizer::new();
        let smoothing = SmoothingSettings::default();
        let adaptive = settings(NormalizationMethod::Adaptive);

        let first = band.process(0.1, &smoothing, &adaptive).normalized;
        let mut last = first;
        for _ in 0..1000 {
            last = band.process(0.1, &smoothing, &adaptive).normalized;
        }
        assert!(last > first);
        assert!(last <= 1.0);
    }

    #[test]
    fn test_non_finite_input_reads_as_zero() {
        let mut band = BandNormalizer::new();
        let level = band.process(f32::NAN, &SmoothingSettings::default(), &settings(NormalizationMethod::Peak));
        assert_eq!(level.smoothed, 0.0);
        assert_eq!(level.normalized, 0.0);
    }

    #[test]
    fn test_settings_validation() {
        assert!(SmoothingSettings { enabled: true, factor: 1.0 }.validate().is_err());
        assert!(SmoothingSettings { enabled: true, factor: 0.0 }.validate().is_ok());
        assert!(NormalizationSettings::default().validate().is_ok());

        let bad = NormalizationSettings {
            min_gain: 4.0,
            max_gain: 2.0,
            ..NormalizationSettings::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_reset_clears_state() {
        let mut band = BandNormalizer::new();
        let adaptive = settings(NormalizationMethod::Adaptive);
        for _ in 0..50 {
            band.process(0.7, &SmoothingSettings::default(), &adaptive);
        }
        band.reset();
        assert_eq!(band.smoothed(), 0.0);
        assert_eq!(band.gain(), 1.0);
    }
}
