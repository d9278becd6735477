use anyhow::{anyhow, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Flux capture (.flxc) - recorded byte spectra for offline replay
///
/// Layout (all integers little-endian):
/// - Magic bytes: "FLXC" (4 bytes)
/// - Version: u8
/// - Sample rate: u32
/// - Bin count: u32
/// - Frame rate: f32
/// - Frame count: u32
/// - Frames: `frame_count * bin_count` bytes, one byte per bin
const MAGIC_BYTES: &[u8; 4] = b"FLXC";
const FORMAT_VERSION: u8 = 1;
/// Largest spectrum accepted from a file (an FFT of 131072 points).
const MAX_BIN_COUNT: u32 = 1 << 16;

#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumCapture {
    sample_rate: u32,
    bin_count: u32,
    frame_rate: f32,
    frames: Vec<Vec<u8>>,
}

impl SpectrumCapture {
    pub fn new(sample_rate: u32, bin_count: u32, frame_rate: f32) -> Self {
        Self {
            sample_rate,
            bin_count,
            frame_rate,
            frames: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count as usize
    }

    pub fn frame_rate(&self) -> f32 {
        self.frame_rate
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    pub fn frame_duration_ms(&self) -> f64 {
        1000.0 / self.frame_rate as f64
    }

    pub fn push_frame(&mut self, bins: &[u8]) -> Result<()> {
        if bins.len() != self.bin_count() {
            return Err(anyhow!(
                "Frame has {} bins, capture expects {}",
                bins.len(),
                self.bin_count
            ));
        }
        self.frames.push(bins.to_vec());
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        if self.bin_count == 0 || self.bin_count > MAX_BIN_COUNT {
            return Err(anyhow!("Cannot write capture with {} bins", self.bin_count));
        }
        let frame_count = u32::try_from(self.frames.len())
            .map_err(|_| anyhow!("Too many frames for capture: {}", self.frames.len()))?;

        writer.write_all(MAGIC_BYTES)?;
        writer.write_all(&[FORMAT_VERSION])?;
        writer.write_all(&self.sample_rate.to_le_bytes())?;
        writer.write_all(&self.bin_count.to_le_bytes())?;
        writer.write_all(&self.frame_rate.to_le_bytes())?;
        writer.write_all(&frame_count.to_le_bytes())?;

        for frame in &self.frames {
            writer.write_all(frame)?;
        }

        log::debug!(
            "Wrote capture: {} frames x {} bins at {:.1} fps",
            frame_count,
            self.bin_count,
            self.frame_rate
        );
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC_BYTES {
            return Err(anyhow!("Invalid capture file: bad magic bytes"));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != FORMAT_VERSION {
            return Err(anyhow!("Unsupported capture version: {}", version[0]));
        }

        let mut word = [0u8; 4];
        reader.read_exact(&mut word)?;
        let sample_rate = u32::from_le_bytes(word);
        reader.read_exact(&mut word)?;
        let bin_count = u32::from_le_bytes(word);
        reader.read_exact(&mut word)?;
        let frame_rate = f32::from_le_bytes(word);
        reader.read_exact(&mut word)?;
        let frame_count = u32::from_le_bytes(word) as usize;

        if sample_rate == 0 {
            return Err(anyhow!("Invalid capture file: sample rate is zero"));
        }
        if !(frame_rate > 0.0 && frame_rate.is_finite()) {
            return Err(anyhow!("Invalid capture file: frame rate {}", frame_rate));
        }
        if bin_count == 0 || bin_count > MAX_BIN_COUNT {
            return Err(anyhow!(
                "Invalid capture file: bin count {} outside 1..={}",
                bin_count,
                MAX_BIN_COUNT
            ));
        }
        frame_count
            .checked_mul(bin_count as usize)
            .ok_or_else(|| anyhow!("Invalid capture file: {} frames of {} bins", frame_count, bin_count))?;

        let mut frames = Vec::with_capacity(frame_count.min(1 << 16));
        for _ in 0..frame_count {
            let mut bins = vec![0u8; bin_count as usize];
            reader.read_exact(&mut bins)?;
            frames.push(bins);
        }

        Ok(Self {
            sample_rate,
            bin_count,
            frame_rate,
            frames,
        })
    }
}
