use thiserror::Error;

/// Errors raised by the analysis components.
///
/// `NotInitialized` is a host integration bug and the only error the hot path
/// can return. Everything else is produced while applying configuration.
/// Malformed spectra never produce an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyzerError {
    #[error("Analyzer used before initialize() was called")]
    NotInitialized,
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f32),
    #[error("Invalid frequency range '{name}': {min_hz} Hz .. {max_hz} Hz")]
    InvalidFrequencyRange { name: String, min_hz: f32, max_hz: f32 },
    #[error("Invalid weight for band '{name}': {weight}")]
    InvalidWeight { name: String, weight: f32 },
    #[error("Required band '{0}' is not configured")]
    MissingBand(&'static str),
    #[error("Invalid value for setting '{name}': {value}")]
    InvalidSetting { name: &'static str, value: f64 },
}
