use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::band_normalizer::{
    BandNormalizer, NormalizationMethod, NormalizationSettings, SmoothingSettings,
};
use super::frequency_ranges::{
    default_ranges, validate_ranges, BandBinInfo, BinMapping, FrequencyRange,
};
use super::{AnalyzerError, SpectrumSample};

/// Fraction of cumulative spectral energy that defines the rolloff frequency.
const ROLLOFF_FRACTION: f32 = 0.85;

/// Ticks between debug summaries of the band levels.
const LOG_INTERVAL: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectrumScale {
    Log,
    Linear,
}

/// Reduced-resolution spectrum output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumSettings {
    pub enabled: bool,
    /// Number of output points.
    pub resolution: usize,
    pub scale: SpectrumScale,
    /// Lowest edge of the first log bucket, in Hz.
    pub min_frequency: f32,
}

impl Default for SpectrumSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            resolution: 64,
            scale: SpectrumScale::Log,
            min_frequency: 20.0,
        }
    }
}

impl SpectrumSettings {
    pub fn validate(&self) -> Result<(), AnalyzerError> {
        if self.enabled && self.resolution == 0 {
            return Err(AnalyzerError::InvalidSetting {
                name: "spectrum.resolution",
                value: 0.0,
            });
        }
        if !(self.min_frequency > 0.0 && self.min_frequency.is_finite()) {
            return Err(AnalyzerError::InvalidSetting {
                name: "spectrum.min_frequency",
                value: self.min_frequency as f64,
            });
        }
        Ok(())
    }
}

/// Full configuration of a [`FrequencyAnalyzer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub ranges: BTreeMap<String, FrequencyRange>,
    pub smoothing: SmoothingSettings,
    pub normalization: NormalizationSettings,
    pub spectrum: SpectrumSettings,
    /// Full-scale value of one spectrum sample (255 for byte spectra).
    pub max_sample_value: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            ranges: default_ranges(),
            smoothing: SmoothingSettings::default(),
            normalization: NormalizationSettings::default(),
            spectrum: SpectrumSettings::default(),
            max_sample_value: 255.0,
        }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<(), AnalyzerError> {
        validate_ranges(&self.ranges)?;
        self.smoothing.validate()?;
        self.normalization.validate()?;
        self.spectrum.validate()?;
        if !(self.max_sample_value > 0.0 && self.max_sample_value.is_finite()) {
            return Err(AnalyzerError::InvalidSetting {
                name: "max_sample_value",
                value: self.max_sample_value as f64,
            });
        }
        Ok(())
    }
}

/// Partial update of everything but the band table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerSettingsPatch {
    pub smoothing_enabled: Option<bool>,
    pub smoothing_factor: Option<f32>,
    pub normalization: Option<NormalizationMethod>,
    pub peak_decay: Option<f32>,
    pub rms_window: Option<usize>,
    pub rms_target: Option<f32>,
    pub adaptive_target: Option<f32>,
    pub adaptive_rate: Option<f32>,
    pub min_gain: Option<f32>,
    pub max_gain: Option<f32>,
    pub spectrum_enabled: Option<bool>,
    pub spectrum_resolution: Option<usize>,
    pub spectrum_scale: Option<SpectrumScale>,
    pub spectrum_min_frequency: Option<f32>,
    pub max_sample_value: Option<f32>,
}

impl AnalyzerSettingsPatch {
    fn apply_to(&self, config: &mut AnalyzerConfig) {
        if let Some(enabled) = self.smoothing_enabled {
            config.smoothing.enabled = enabled;
        }
        if let Some(factor) = self.smoothing_factor {
            config.smoothing.factor = factor;
        }
        if let Some(method) = self.normalization {
            config.normalization.method = method;
        }
        if let Some(decay) = self.peak_decay {
            config.normalization.peak_decay = decay;
        }
        if let Some(window) = self.rms_window {
            config.normalization.rms_window = window;
        }
        if let Some(target) = self.rms_target {
            config.normalization.rms_target = target;
        }
        if let Some(target) = self.adaptive_target {
            config.normalization.adaptive_target = target;
        }
        if let Some(rate) = self.adaptive_rate {
            config.normalization.adaptive_rate = rate;
        }
        if let Some(min_gain) = self.min_gain {
            config.normalization.min_gain = min_gain;
        }
        if let Some(max_gain) = self.max_gain {
            config.normalization.max_gain = max_gain;
        }
        if let Some(enabled) = self.spectrum_enabled {
            config.spectrum.enabled = enabled;
        }
        if let Some(resolution) = self.spectrum_resolution {
            config.spectrum.resolution = resolution;
        }
        if let Some(scale) = self.spectrum_scale {
            config.spectrum.scale = scale;
        }
        if let Some(min_frequency) = self.spectrum_min_frequency {
            config.spectrum.min_frequency = min_frequency;
        }
        if let Some(max) = self.max_sample_value {
            config.max_sample_value = max;
        }
    }
}

/// Level of one band for one tick, every flavor in `[0,1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandLevel {
    /// Weighted average of this tick's bins.
    pub raw: f32,
    /// Exponential moving average of `raw`.
    pub smoothed: f32,
    /// `smoothed` after the configured normalization.
    pub normalized: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectralMetrics {
    /// Energy-weighted mean frequency, Hz.
    pub centroid: f32,
    /// Frequency below which 85% of the energy lies, Hz.
    pub rolloff: f32,
    /// Mean positive bin-wise change since the previous tick.
    pub flux: f32,
    /// Spread between the loudest and quietest raw band level.
    pub dynamic_range: f32,
    pub dominant_band: Option<String>,
    /// Share of the summed raw band levels, sums to 1 unless silent.
    pub energy_distribution: BTreeMap<String, f32>,
    /// Mean normalized magnitude across all bins.
    pub overall_energy: f32,
    /// Frequency of the loudest bin, Hz.
    pub peak_frequency: f32,
}

/// Downsampled spectrum with a representative frequency per point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedSpectrum {
    pub scale: SpectrumScale,
    pub values: Vec<f32>,
    pub frequencies: Vec<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub bands: BTreeMap<String, BandLevel>,
    pub spectrum: Option<ReducedSpectrum>,
    pub metrics: SpectralMetrics,
}

impl AnalysisResult {
    pub fn band(&self, name: &str) -> Option<&BandLevel> {
        self.bands.get(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Geometry {
    sample_rate: f32,
    bin_count: usize,
    nyquist: f32,
    bin_width: f32,
}

#[derive(Debug, Clone)]
struct BandSlot {
    mapping: BinMapping,
    normalizer: BandNormalizer,
}

/// Half-open bin span feeding one reduced-spectrum point.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SpectrumBucket {
    start_bin: usize,
    end_bin: usize,
    frequency: f32,
}

/// Turns raw magnitude spectra into smoothed, normalized band levels and
/// spectral descriptors.
///
/// Bin mappings are cached at `initialize` and on configuration changes so a
/// tick costs a single pass over the bins. One instance is owned by a single
/// real-time loop; it has no internal synchronization.
pub struct FrequencyAnalyzer {
    config: AnalyzerConfig,
    geometry: Option<Geometry>,
    bands: BTreeMap<String, BandSlot>,
    spectrum_layout: Vec<SpectrumBucket>,

    // Per-bin magnitudes in [0,1], reused every tick
    current: Vec<f32>,
    previous: Vec<f32>,
    has_previous: bool,

    frame_count: u64,
}

impl Default for FrequencyAnalyzer {
    fn default() -> Self {
        Self::from_valid_config(AnalyzerConfig::default())
    }
}

impl FrequencyAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Result<Self, AnalyzerError> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: AnalyzerConfig) -> Self {
        let bands = config
            .ranges
            .keys()
            .map(|name| {
                (
                    name.clone(),
                    BandSlot {
                        mapping: BinMapping::EMPTY,
                        normalizer: BandNormalizer::new(),
                    },
                )
            })
            .collect();

        Self {
            config,
            geometry: None,
            bands,
            spectrum_layout: Vec::new(),
            current: Vec::new(),
            previous: Vec::new(),
            has_previous: false,
            frame_count: 0,
        }
    }

    /// Binds the analyzer to a spectrum shape and computes every band's bin mapping.
    pub fn initialize(&mut self, sample_rate: f32, bin_count: usize) -> Result<(), AnalyzerError> {
        if !(sample_rate > 0.0 && sample_rate.is_finite()) {
            return Err(AnalyzerError::InvalidSampleRate(sample_rate));
        }

        let nyquist = sample_rate / 2.0;
        let bin_width = if bin_count > 0 { nyquist / bin_count as f32 } else { 0.0 };
        let geometry = Geometry {
            sample_rate,
            bin_count,
            nyquist,
            bin_width,
        };

        log::info!(
            "Frequency analyzer initialized: {}Hz sample rate, {} bins, {:.2}Hz per bin",
            sample_rate,
            bin_count,
            bin_width
        );

        self.geometry = Some(geometry);
        for (name, slot) in self.bands.iter_mut() {
            slot.normalizer.reset();
            if let Some(range) = self.config.ranges.get(name) {
                slot.mapping = Self::map_band(name, range, &geometry);
            }
        }
        self.spectrum_layout = Self::build_spectrum_layout(&self.config.spectrum, &geometry);
        self.current = vec![0.0; bin_count];
        self.previous = vec![0.0; bin_count];
        self.has_previous = false;
        self.frame_count = 0;

        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.geometry.is_some()
    }

    pub fn sample_rate(&self) -> Option<f32> {
        self.geometry.map(|g| g.sample_rate)
    }

    pub fn nyquist(&self) -> Option<f32> {
        self.geometry.map(|g| g.nyquist)
    }

    pub fn bin_width(&self) -> Option<f32> {
        self.geometry.map(|g| g.bin_width)
    }

    pub fn bin_count(&self) -> Option<usize> {
        self.geometry.map(|g| g.bin_count)
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyzes one spectrum. Only fails when called before `initialize`.
    pub fn analyze<S: SpectrumSample>(
        &mut self,
        spectrum: &[S],
    ) -> Result<AnalysisResult, AnalyzerError> {
        let geometry = self.geometry.ok_or(AnalyzerError::NotInitialized)?;

        if spectrum.is_empty() {
            return Ok(self.zero_result());
        }

        let max_value = self.config.max_sample_value;
        for (i, slot) in self.current.iter_mut().enumerate() {
            *slot = spectrum
                .get(i)
                .map_or(0.0, |&sample| sample.level(max_value));
        }

        let mut bands = BTreeMap::new();
        for (name, slot) in self.bands.iter_mut() {
            let weight = self.config.ranges.get(name).map_or(0.0, |r| r.weight);
            let bins = slot.mapping.bins(&self.current);
            let raw = if bins.is_empty() {
                0.0
            } else {
                (bins.iter().sum::<f32>() / bins.len() as f32 * weight).clamp(0.0, 1.0)
            };

            let level = slot
                .normalizer
                .process(raw, &self.config.smoothing, &self.config.normalization);

            bands.insert(
                name.clone(),
                BandLevel {
                    raw,
                    smoothed: level.smoothed,
                    normalized: level.normalized,
                },
            );
        }

        let metrics = self.compute_metrics(&bands, &geometry);
        let spectrum = self.reduced_spectrum();

        std::mem::swap(&mut self.current, &mut self.previous);
        self.has_previous = true;

        self.frame_count = self.frame_count.wrapping_add(1);
        if self.frame_count % LOG_INTERVAL == 0 {
            log::debug!(
                "Band levels after {} frames: {}",
                self.frame_count,
                bands
                    .iter()
                    .map(|(name, level)| format!("{}={:.3}", name, level.normalized))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        Ok(AnalysisResult {
            bands,
            spectrum,
            metrics,
        })
    }

    /// Merges band definitions. Bands whose definition actually changed get a
    /// fresh mapping and fresh smoothing state; the rest are untouched.
    pub fn update_frequency_ranges(
        &mut self,
        ranges: BTreeMap<String, FrequencyRange>,
    ) -> Result<(), AnalyzerError> {
        for (name, range) in &ranges {
            range.validate(name)?;
        }

        for (name, range) in ranges {
            if self.config.ranges.get(&name) == Some(&range) {
                continue;
            }

            let mapping = match &self.geometry {
                Some(geometry) => Self::map_band(&name, &range, geometry),
                None => BinMapping::EMPTY,
            };
            log::info!(
                "Frequency range '{}' set to {}-{}Hz (weight {})",
                name,
                range.min_hz,
                range.max_hz,
                range.weight
            );

            self.bands.insert(
                name.clone(),
                BandSlot {
                    mapping,
                    normalizer: BandNormalizer::new(),
                },
            );
            self.config.ranges.insert(name, range);
        }

        Ok(())
    }

    /// Merges smoothing, normalization and spectrum settings.
    pub fn update_settings(&mut self, patch: &AnalyzerSettingsPatch) -> Result<(), AnalyzerError> {
        let mut candidate = self.config.clone();
        patch.apply_to(&mut candidate);
        candidate.validate()?;

        let spectrum_changed = candidate.spectrum != self.config.spectrum;
        self.config = candidate;

        if spectrum_changed {
            if let Some(geometry) = &self.geometry {
                self.spectrum_layout = Self::build_spectrum_layout(&self.config.spectrum, geometry);
            }
        }
        log::info!("Frequency analyzer settings updated: {:?}", patch);

        Ok(())
    }

    /// Cached bin mappings per band.
    pub fn get_frequency_bin_info(&self) -> Result<BTreeMap<String, BandBinInfo>, AnalyzerError> {
        let geometry = self.geometry.ok_or(AnalyzerError::NotInitialized)?;

        Ok(self
            .bands
            .iter()
            .filter_map(|(name, slot)| {
                let range = self.config.ranges.get(name)?;
                Some((
                    name.clone(),
                    BandBinInfo {
                        min_hz: range.min_hz,
                        max_hz: range.max_hz,
                        weight: range.weight,
                        start_bin: slot.mapping.start_bin,
                        end_bin: slot.mapping.end_bin,
                        bin_count: slot.mapping.bin_count,
                        start_frequency: slot.mapping.start_bin as f32 * geometry.bin_width,
                        end_frequency: (slot.mapping.end_bin + 1) as f32 * geometry.bin_width,
                    },
                ))
            })
            .collect())
    }

    /// Clears smoothing, normalization and flux history. Bin mappings survive.
    pub fn reset(&mut self) {
        for slot in self.bands.values_mut() {
            slot.normalizer.reset();
        }
        self.previous.iter_mut().for_each(|v| *v = 0.0);
        self.has_previous = false;
        self.frame_count = 0;
        log::debug!("Frequency analyzer state reset");
    }

    /// Returns to the uninitialized state, ready for another `initialize`.
    pub fn dispose(&mut self) {
        self.geometry = None;
        for slot in self.bands.values_mut() {
            slot.mapping = BinMapping::EMPTY;
            slot.normalizer.reset();
        }
        self.spectrum_layout.clear();
        self.current.clear();
        self.previous.clear();
        self.has_previous = false;
        self.frame_count = 0;
    }

    fn map_band(name: &str, range: &FrequencyRange, geometry: &Geometry) -> BinMapping {
        let mapping = BinMapping::compute(range, geometry.bin_width, geometry.bin_count);
        log::debug!(
            "Band '{}' ({}-{}Hz) -> bins {}..={} ({} bins)",
            name,
            range.min_hz,
            range.max_hz,
            mapping.start_bin,
            mapping.end_bin,
            mapping.bin_count
        );
        mapping
    }

    fn zero_result(&self) -> AnalysisResult {
        let bands = self
            .bands
            .keys()
            .map(|name| (name.clone(), BandLevel::default()))
            .collect();
        let energy_distribution = self.bands.keys().map(|name| (name.clone(), 0.0)).collect();

        let spectrum = self.config.spectrum.enabled.then(|| ReducedSpectrum {
            scale: self.config.spectrum.scale,
            values: vec![0.0; self.spectrum_layout.len()],
            frequencies: self.spectrum_layout.iter().map(|b| b.frequency).collect(),
        });

        AnalysisResult {
            bands,
            spectrum,
            metrics: SpectralMetrics {
                energy_distribution,
                ..SpectralMetrics::default()
            },
        }
    }

    fn compute_metrics(&self, bands: &BTreeMap<String, BandLevel>, geometry: &Geometry) -> SpectralMetrics {
        let bins = &self.current;
        let bin_width = geometry.bin_width;

        let mut magnitude_sum = 0.0f32;
        let mut weighted_sum = 0.0f32;
        let mut energy_total = 0.0f32;
        let mut peak_bin = 0usize;
        let mut peak_value = 0.0f32;
        for (i, &magnitude) in bins.iter().enumerate() {
            magnitude_sum += magnitude;
            weighted_sum += i as f32 * bin_width * magnitude;
            energy_total += magnitude * magnitude;
            if magnitude > peak_value {
                peak_value = magnitude;
                peak_bin = i;
            }
        }

        let centroid = if magnitude_sum > 0.0 {
            weighted_sum / magnitude_sum
        } else {
            0.0
        };

        let mut rolloff = 0.0;
        if energy_total > 0.0 {
            let threshold = energy_total * ROLLOFF_FRACTION;
            let mut cumulative = 0.0;
            for (i, &magnitude) in bins.iter().enumerate() {
                cumulative += magnitude * magnitude;
                if cumulative >= threshold {
                    rolloff = i as f32 * bin_width;
                    break;
                }
            }
        }

        let flux = if self.has_previous && !bins.is_empty() {
            bins.iter()
                .zip(self.previous.iter())
                .map(|(&current, &previous)| (current - previous).max(0.0))
                .sum::<f32>()
                / bins.len() as f32
        } else {
            0.0
        };

        let overall_energy = if bins.is_empty() {
            0.0
        } else {
            magnitude_sum / bins.len() as f32
        };

        let mut max_level = f32::NEG_INFINITY;
        let mut min_level = f32::INFINITY;
        let mut dominant_band = None;
        let mut level_total = 0.0;
        for (name, level) in bands {
            if level.raw > max_level {
                max_level = level.raw;
                if level.raw > 0.0 {
                    dominant_band = Some(name.clone());
                }
            }
            min_level = min_level.min(level.raw);
            level_total += level.raw;
        }
        let dynamic_range = if bands.is_empty() { 0.0 } else { max_level - min_level };

        let energy_distribution = bands
            .iter()
            .map(|(name, level)| {
                let share = if level_total > 0.0 { level.raw / level_total } else { 0.0 };
                (name.clone(), share)
            })
            .collect();

        SpectralMetrics {
            centroid,
            rolloff,
            flux,
            dynamic_range,
            dominant_band,
            energy_distribution,
            overall_energy,
            peak_frequency: if peak_value > 0.0 { peak_bin as f32 * bin_width } else { 0.0 },
        }
    }

    fn reduced_spectrum(&self) -> Option<ReducedSpectrum> {
        if !self.config.spectrum.enabled {
            return None;
        }

        let mut values = Vec::with_capacity(self.spectrum_layout.len());
        let mut frequencies = Vec::with_capacity(self.spectrum_layout.len());
        for bucket in &self.spectrum_layout {
            let bins = &self.current[bucket.start_bin..bucket.end_bin];
            let value = if bins.is_empty() {
                0.0
            } else {
                bins.iter().sum::<f32>() / bins.len() as f32
            };
            values.push(value.clamp(0.0, 1.0));
            frequencies.push(bucket.frequency);
        }

        Some(ReducedSpectrum {
            scale: self.config.spectrum.scale,
            values,
            frequencies,
        })
    }

    fn build_spectrum_layout(settings: &SpectrumSettings, geometry: &Geometry) -> Vec<SpectrumBucket> {
        let bins = geometry.bin_count;
        let points = settings.resolution;
        if !settings.enabled || bins == 0 || points == 0 {
            return Vec::new();
        }

        let min_frequency = settings.min_frequency.max(geometry.bin_width);
        if settings.scale == SpectrumScale::Linear || min_frequency >= geometry.nyquist {
            return Self::linear_layout(points, bins, geometry.bin_width);
        }

        // Bucket edges grow geometrically from min_frequency up to Nyquist.
        // Each bucket takes at least one bin of its own while enough bins
        // remain, so narrow low buckets never repeat a span.
        let bin_width = geometry.bin_width;
        let ratio = geometry.nyquist / min_frequency;
        let edge_bin = |k: usize| {
            (min_frequency * ratio.powf(k as f32 / points as f32) / bin_width).floor() as usize
        };

        let mut start_bin = edge_bin(0).min(bins - 1);
        let mut buckets = Vec::with_capacity(points);
        for k in 0..points {
            let remaining = points - k - 1;
            let end_bin = if remaining == 0 {
                bins
            } else {
                edge_bin(k + 1)
                    .min(bins.saturating_sub(remaining))
                    .max(start_bin + 1)
                    .min(bins)
            };
            let low_hz = (start_bin as f32).max(0.5) * bin_width;
            let high_hz = end_bin as f32 * bin_width;
            buckets.push(SpectrumBucket {
                start_bin,
                end_bin,
                frequency: (low_hz * high_hz).sqrt(),
            });
            start_bin = end_bin.min(bins - 1);
        }
        buckets
    }

    fn linear_layout(points: usize, bins: usize, bin_width: f32) -> Vec<SpectrumBucket> {
        (0..points)
            .map(|k| {
                let start_bin = (k * bins / points).min(bins - 1);
                let end_bin = ((k + 1) * bins / points).max(start_bin + 1).min(bins);
                let center = (start_bin + end_bin) as f32 / 2.0;
                SpectrumBucket {
                    start_bin,
                    end_bin,
                    frequency: center * bin_width,
                }
            })
            .collect()
    }
}
