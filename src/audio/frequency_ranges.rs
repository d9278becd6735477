use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::AnalyzerError;

/// Bands every configuration must define.
pub const REQUIRED_BANDS: [&str; 3] = ["bass", "mids", "treble"];

/// A named perceptual band, in Hz, with a linear weight applied to its raw level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyRange {
    pub min_hz: f32,
    pub max_hz: f32,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

fn default_weight() -> f32 {
    1.0
}

impl FrequencyRange {
    pub fn new(min_hz: f32, max_hz: f32, weight: f32) -> Self {
        Self { min_hz, max_hz, weight }
    }

    pub fn validate(&self, name: &str) -> Result<(), AnalyzerError> {
        let ordered = self.min_hz.is_finite()
            && self.max_hz.is_finite()
            && self.min_hz >= 0.0
            && self.min_hz < self.max_hz;
        if !ordered {
            return Err(AnalyzerError::InvalidFrequencyRange {
                name: name.to_string(),
                min_hz: self.min_hz,
                max_hz: self.max_hz,
            });
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(AnalyzerError::InvalidWeight {
                name: name.to_string(),
                weight: self.weight,
            });
        }
        Ok(())
    }
}

/// The stock three-band split.
pub fn default_ranges() -> BTreeMap<String, FrequencyRange> {
    let mut ranges = BTreeMap::new();
    ranges.insert("bass".to_string(), FrequencyRange::new(20.0, 250.0, 1.0));
    ranges.insert("mids".to_string(), FrequencyRange::new(250.0, 4000.0, 1.0));
    ranges.insert("treble".to_string(), FrequencyRange::new(4000.0, 20000.0, 1.0));
    ranges
}

/// Finer split used by hosts that want more than three bands.
pub fn extended_ranges() -> BTreeMap<String, FrequencyRange> {
    let mut ranges = default_ranges();
    ranges.insert("sub_bass".to_string(), FrequencyRange::new(20.0, 60.0, 1.0));
    ranges.insert("low_mids".to_string(), FrequencyRange::new(250.0, 500.0, 1.0));
    ranges.insert("high_mids".to_string(), FrequencyRange::new(2000.0, 4000.0, 1.0));
    ranges.insert("high_treble".to_string(), FrequencyRange::new(12000.0, 20000.0, 1.0));
    ranges
}

/// Checks every range and the presence of the required bands.
pub fn validate_ranges(ranges: &BTreeMap<String, FrequencyRange>) -> Result<(), AnalyzerError> {
    for required in REQUIRED_BANDS {
        if !ranges.contains_key(required) {
            return Err(AnalyzerError::MissingBand(required));
        }
    }
    for (name, range) in ranges {
        range.validate(name)?;
    }
    Ok(())
}

/// Inclusive bin span covered by one band.
///
/// `bin_count == 0` only happens when the spectrum itself has no bins; such a
/// band always reports zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinMapping {
    pub start_bin: usize,
    pub end_bin: usize,
    pub bin_count: usize,
}

impl BinMapping {
    pub const EMPTY: BinMapping = BinMapping {
        start_bin: 0,
        end_bin: 0,
        bin_count: 0,
    };

    /// Maps a Hz range onto spectrum bins. Ranges past Nyquist clamp to the last
    /// bin, and every non-empty spectrum yields at least one bin per band.
    pub fn compute(range: &FrequencyRange, bin_width: f32, total_bins: usize) -> Self {
        if total_bins == 0 || !(bin_width > 0.0) {
            return Self::EMPTY;
        }
        let last = total_bins - 1;
        let start_bin = ((range.min_hz / bin_width).floor() as usize).min(last);
        let end_bin = ((range.max_hz / bin_width).floor() as usize)
            .min(last)
            .max(start_bin);

        Self {
            start_bin,
            end_bin,
            bin_count: end_bin - start_bin + 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bin_count == 0
    }

    pub fn bins<'a>(&self, data: &'a [f32]) -> &'a [f32] {
        if self.is_empty() || self.start_bin >= data.len() {
            return &[];
        }
        let end = (self.end_bin + 1).min(data.len());
        &data[self.start_bin..end]
    }
}

/// Diagnostic view of one band's cached mapping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandBinInfo {
    pub min_hz: f32,
    pub max_hz: f32,
    pub weight: f32,
    pub start_bin: usize,
    pub end_bin: usize,
    pub bin_count: usize,
    pub start_frequency: f32,
    pub end_frequency: f32,
}
