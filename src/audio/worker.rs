use anyhow::{anyhow, Result};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use super::{AnalysisFrame, BeatDetector, FrequencyAnalyzer, SpectrumFrame};

/// Runs analysis on a background thread. The host submits spectra as they
/// arrive and the render loop reads whatever frame finished last.
pub struct AnalysisWorker {
    sender: Option<Sender<SpectrumFrame>>,
    latest_frame: Arc<Mutex<AnalysisFrame>>,
    handle: Option<JoinHandle<u64>>,
}

fn lock_frame(frame: &Mutex<AnalysisFrame>) -> MutexGuard<'_, AnalysisFrame> {
    frame.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AnalysisWorker {
    /// Takes an initialized analyzer and a detector and starts the worker thread.
    pub fn spawn(analyzer: FrequencyAnalyzer, detector: BeatDetector) -> Result<Self> {
        if !analyzer.is_initialized() {
            return Err(anyhow!("Analyzer must be initialized before spawning a worker"));
        }

        let (sender, receiver) = crossbeam_channel::unbounded();
        let latest_frame = Arc::new(Mutex::new(AnalysisFrame::default()));
        let shared = Arc::clone(&latest_frame);

        let handle = std::thread::Builder::new()
            .name("flux-analysis".to_string())
            .spawn(move || Self::run(receiver, analyzer, detector, shared))?;

        info!("Analysis worker started");

        Ok(Self {
            sender: Some(sender),
            latest_frame,
            handle: Some(handle),
        })
    }

    fn run(
        receiver: Receiver<SpectrumFrame>,
        mut analyzer: FrequencyAnalyzer,
        mut detector: BeatDetector,
        latest_frame: Arc<Mutex<AnalysisFrame>>,
    ) -> u64 {
        let mut processed = 0u64;

        while let Ok(first) = receiver.recv() {
            // Every queued spectrum goes through both stages in order so the
            // beat history stays continuous; only the newest result is published.
            let mut newest = None;
            for spectrum in std::iter::once(first).chain(receiver.try_iter()) {
                if let Some(frame) = Self::process(&mut analyzer, &mut detector, &spectrum) {
                    newest = Some(frame);
                    processed += 1;
                }
            }

            if let Some(frame) = newest {
                *lock_frame(&latest_frame) = frame;
            }
        }

        debug!("Analysis worker drained after {} frames", processed);
        processed
    }

    fn process(
        analyzer: &mut FrequencyAnalyzer,
        detector: &mut BeatDetector,
        spectrum: &SpectrumFrame,
    ) -> Option<AnalysisFrame> {
        let analysis = match analyzer.analyze(spectrum.bins.as_slice()) {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!("Failed to analyze spectrum: {}", e);
                return None;
            }
        };
        let beat = detector.detect_beat_at(spectrum.bins.as_slice(), spectrum.timestamp_ms);

        Some(AnalysisFrame {
            timestamp_ms: spectrum.timestamp_ms,
            analysis,
            beat,
            bpm: detector.calculate_bpm(),
        })
    }

    pub fn submit(&self, frame: SpectrumFrame) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("Analysis worker has been shut down"))?;
        sender
            .send(frame)
            .map_err(|_| anyhow!("Analysis worker is no longer running"))
    }

    pub fn latest(&self) -> AnalysisFrame {
        lock_frame(&self.latest_frame).clone()
    }

    /// Closes the queue, waits for pending spectra and returns how many were analyzed.
    pub fn shutdown(&mut self) -> Result<u64> {
        self.sender.take();
        match self.handle.take() {
            Some(handle) => {
                let processed = handle
                    .join()
                    .map_err(|_| anyhow!("Analysis worker thread panicked"))?;
                info!("Analysis worker stopped after {} frames", processed);
                Ok(processed)
            }
            None => Ok(0),
        }
    }
}

impl Drop for AnalysisWorker {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("{}", e);
        }
    }
}
