pub mod band_normalizer;
pub mod beat_detector;
pub mod capture_format;
pub mod clock;
pub mod error;
pub mod frequency_analyzer;
pub mod frequency_ranges;
pub mod session;
pub mod spectrum_source;
pub mod worker;

pub use band_normalizer::{NormalizationMethod, NormalizationSettings, SmoothingSettings};
pub use beat_detector::{
    BeatConfigPatch, BeatDetector, BeatDetectorConfig, BeatEvent, BeatHistoryEntry, BeatStats,
    DetectorState,
};
pub use capture_format::SpectrumCapture;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::AnalyzerError;
pub use frequency_analyzer::{
    AnalysisResult, AnalyzerConfig, AnalyzerSettingsPatch, BandLevel, FrequencyAnalyzer,
    ReducedSpectrum, SpectralMetrics, SpectrumScale, SpectrumSettings,
};
pub use frequency_ranges::{BandBinInfo, BinMapping, FrequencyRange};
pub use session::{AnalysisSession, SessionReport, SessionStatistics};
pub use spectrum_source::{SpectrumConverter, SpectrumScaling};
pub use worker::AnalysisWorker;

/// One magnitude sample of a spectrum, in whatever numeric type the host delivers.
pub trait SpectrumSample: Copy {
    fn magnitude(self) -> f32;

    /// Magnitude as a fraction of `max_value`. Non-finite and negative
    /// samples read as silence; anything above full scale clamps to 1.
    fn level(self, max_value: f32) -> f32 {
        let magnitude = self.magnitude();
        if magnitude.is_finite() && magnitude > 0.0 {
            (magnitude / max_value).min(1.0)
        } else {
            0.0
        }
    }
}

impl SpectrumSample for u8 {
    fn magnitude(self) -> f32 {
        self as f32
    }
}

impl SpectrumSample for u16 {
    fn magnitude(self) -> f32 {
        self as f32
    }
}

impl SpectrumSample for f32 {
    fn magnitude(self) -> f32 {
        self
    }
}

impl SpectrumSample for f64 {
    fn magnitude(self) -> f32 {
        self as f32
    }
}

/// A spectrum delivered by the host together with the time it was captured.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFrame {
    pub timestamp_ms: f64,
    pub bins: Vec<u8>,
}

/// Everything the effects layer consumes for one tick.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AnalysisFrame {
    pub timestamp_ms: f64,
    pub analysis: AnalysisResult,
    pub beat: BeatEvent,
    pub bpm: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_levels() {
        assert_eq!(255u8.level(255.0), 1.0);
        assert_eq!(0u8.level(255.0), 0.0);
        assert_eq!(f32::NAN.level(255.0), 0.0);
        assert_eq!(f32::INFINITY.level(255.0), 0.0);
        assert_eq!((-12.0f32).level(255.0), 0.0);
        assert_eq!(1000.0f64.level(255.0), 1.0);
        assert!((512u16.level(1024.0) - 0.5).abs() < 1e-6);
    }
}
