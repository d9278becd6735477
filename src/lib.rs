//! Real-time spectrum analysis for audio-reactive visuals: per-band levels,
//! spectral metrics, a reduced display spectrum and adaptive beat detection.

pub mod audio;
pub mod config;

pub use config::FluxConfig;
