use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::audio::{AnalyzerConfig, BeatDetector, BeatDetectorConfig, FrequencyAnalyzer};

/// Settings for both analysis stages, as stored on disk.
///
/// Missing sections and fields fall back to their defaults, so a file only
/// needs to mention what it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluxConfig {
    pub analyzer: AnalyzerConfig,
    pub beat: BeatDetectorConfig,
}

impl FluxConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&json)?;
        info!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.analyzer.validate()?;
        self.beat.validate()?;
        Ok(())
    }

    pub fn build_analyzer(&self) -> Result<FrequencyAnalyzer> {
        Ok(FrequencyAnalyzer::new(self.analyzer.clone())?)
    }

    pub fn build_detector(&self) -> Result<BeatDetector> {
        Ok(BeatDetector::new(self.beat)?)
    }
}
