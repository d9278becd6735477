//! Host-side helpers that turn PCM audio into byte magnitude spectra.
//!
//! The analysis core only ever sees spectra. These helpers produce them from
//! WAV files so the tools and tests can drive the core offline.

use anyhow::{bail, Result};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::path::Path;
use std::sync::Arc;

use super::SpectrumCapture;

/// Mapping from linear FFT magnitude to the 0-255 byte range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumScaling {
    pub min_decibels: f32,
    pub max_decibels: f32,
    /// Weight of the previous frame's magnitude, in `[0,1)`.
    pub smoothing_time_constant: f32,
}

impl Default for SpectrumScaling {
    fn default() -> Self {
        Self {
            min_decibels: -100.0,
            max_decibels: -30.0,
            smoothing_time_constant: 0.8,
        }
    }
}

/// Windowed FFT producing `fft_size / 2` byte bins per call.
pub struct SpectrumConverter {
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    bytes: Vec<u8>,
    scaling: SpectrumScaling,
}

impl SpectrumConverter {
    pub fn new(fft_size: usize, scaling: SpectrumScaling) -> Result<Self> {
        if fft_size < 2 || fft_size % 2 != 0 {
            bail!("FFT size must be an even number of at least 2, got {}", fft_size);
        }
        if scaling.min_decibels >= scaling.max_decibels {
            bail!(
                "min_decibels ({}) must be below max_decibels ({})",
                scaling.min_decibels,
                scaling.max_decibels
            );
        }
        if !(0.0..1.0).contains(&scaling.smoothing_time_constant) {
            bail!("smoothing_time_constant must be in [0, 1), got {}", scaling.smoothing_time_constant);
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        Ok(Self {
            fft_size,
            fft,
            window: Self::hann_window(fft_size),
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            smoothed: vec![0.0; fft_size / 2],
            bytes: vec![0; fft_size / 2],
            scaling,
        })
    }

    fn hann_window(size: usize) -> Vec<f32> {
        (0..size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32;
                0.5 * (1.0 - phase.cos())
            })
            .collect()
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Transforms one block of mono samples. Short blocks are zero-padded.
    pub fn process(&mut self, samples: &[f32]) -> &[u8] {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = samples.get(i).copied().filter(|s| s.is_finite()).unwrap_or(0.0);
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.buffer);

        let tau = self.scaling.smoothing_time_constant;
        let range = self.scaling.max_decibels - self.scaling.min_decibels;
        let scale = self.fft_size as f32;

        for (i, byte) in self.bytes.iter_mut().enumerate() {
            let magnitude = self.buffer[i].norm() / scale;
            self.smoothed[i] = tau * self.smoothed[i] + (1.0 - tau) * magnitude;

            let level = self.smoothed[i];
            *byte = if level > 0.0 {
                let decibels = 20.0 * level.log10();
                (255.0 * (decibels - self.scaling.min_decibels) / range).clamp(0.0, 255.0) as u8
            } else {
                0
            };
        }

        &self.bytes
    }

    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|v| *v = 0.0);
    }
}

/// Reads a WAV file and mixes it down to mono `f32` samples.
pub fn load_wav_mono<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let full_scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / full_scale))
                .collect::<Result<_, _>>()?
        }
    };

    let mono = interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();

    Ok((mono, spec.sample_rate))
}

/// Slices mono audio into blocks at `frame_rate` and converts each to a byte spectrum.
pub fn capture_from_samples(
    samples: &[f32],
    sample_rate: u32,
    fft_size: usize,
    frame_rate: f32,
    scaling: SpectrumScaling,
) -> Result<SpectrumCapture> {
    if !(frame_rate > 0.0 && frame_rate.is_finite()) {
        bail!("Invalid frame rate: {}", frame_rate);
    }
    if sample_rate == 0 {
        bail!("Invalid sample rate: 0");
    }

    let mut converter = SpectrumConverter::new(fft_size, scaling)?;
    let hop = ((sample_rate as f32 / frame_rate).round() as usize).max(1);

    let mut capture = SpectrumCapture::new(sample_rate, converter.bin_count() as u32, frame_rate);
    let mut position = 0;
    while position + fft_size <= samples.len() {
        let bins = converter.process(&samples[position..position + fft_size]);
        capture.push_frame(bins)?;
        position += hop;
    }

    log::info!(
        "Converted {} samples into {} spectra ({} bins, {:.1} fps)",
        samples.len(),
        capture.frame_count(),
        converter.bin_count(),
        frame_rate
    );

    Ok(capture)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 44100;

    fn sine(frequency: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * frequency * i as f32 / SAMPLE_RATE as f32).sin())
            .collect()
    }

    #[test]
    fn test_sine_peaks_at_expected_bin() {
        // Wide range so the main lobe does not saturate at 255
        let scaling = SpectrumScaling {
            min_decibels: -100.0,
            max_decibels: 0.0,
            smoothing_time_constant: 0.0,
        };
        let mut converter = SpectrumConverter::new(2048, scaling).unwrap();
        let bytes = converter.process(&sine(1000.0, 2048)).to_vec();

        let peak = bytes
            .iter()
            .enumerate()
            .max_by_key(|(_, &v)| v)
            .map(|(i, _)| i)
            .unwrap();
        let expected = (1000.0 / (SAMPLE_RATE as f32 / 2048.0)).round() as usize;
        assert!(peak.abs_diff(expected) <= 1, "peak bin {peak}, expected {expected}");
        assert_eq!(bytes.len(), 1024);
    }

    #[test]
    fn test_silence_is_zero() {
        let mut converter = SpectrumConverter::new(512, SpectrumScaling::default()).unwrap();
        assert!(converter.process(&[0.0; 512]).iter().all(|&v| v == 0));
        assert!(converter.process(&[]).iter().all(|&v| v == 0));
    }

    #[test]
    fn test_smoothing_lets_energy_decay() {
        let mut converter = SpectrumConverter::new(1024, SpectrumScaling::default()).unwrap();
        let tone = sine(440.0, 1024);
        let loud = converter.process(&tone).iter().map(|&v| v as u32).sum::<u32>();
        let after = converter.process(&[0.0; 1024]).iter().map(|&v| v as u32).sum::<u32>();
        assert!(after > 0);
        assert!(after <= loud);

        converter.reset();
        assert!(converter.process(&[0.0; 1024]).iter().all(|&v| v == 0));
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(SpectrumConverter::new(1, SpectrumScaling::default()).is_err());
        assert!(SpectrumConverter::new(
            1024,
            SpectrumScaling {
                min_decibels: -10.0,
                max_decibels: -20.0,
                smoothing_time_constant: 0.5,
            }
        )
        .is_err());
    }

    #[test]
    fn test_capture_from_samples_frame_count() {
        let audio = sine(220.0, SAMPLE_RATE as usize);
        let capture =
            capture_from_samples(&audio, SAMPLE_RATE, 2048, 50.0, SpectrumScaling::default()).unwrap();
        // hop of 882 samples over one second, last window must fit entirely
        let expected = (SAMPLE_RATE as usize - 2048) / 882 + 1;
        assert_eq!(capture.frame_count(), expected);
        assert_eq!(capture.bin_count(), 1024);
    }
}
