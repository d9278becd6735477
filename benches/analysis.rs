use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flux_analysis::audio::{BeatDetector, FrequencyAnalyzer};

const BINS: usize = 1024;

fn test_spectrum(seed: usize) -> Vec<u8> {
    (0..BINS)
        .map(|i| (((i * 31 + seed * 17) % 97) as f32 * 255.0 / 96.0 * (1.0 - i as f32 / BINS as f32)) as u8)
        .collect()
}

fn bench_analyze(c: &mut Criterion) {
    let mut analyzer = FrequencyAnalyzer::default();
    analyzer.initialize(44100.0, BINS).expect("initialize analyzer");
    let spectra: Vec<Vec<u8>> = (0..16).map(test_spectrum).collect();

    let mut tick = 0;
    c.bench_function("analyze_1024_bins", |b| {
        b.iter(|| {
            tick = (tick + 1) % spectra.len();
            black_box(analyzer.analyze(black_box(spectra[tick].as_slice())).expect("analyze"))
        })
    });
}

fn bench_detect_beat(c: &mut Criterion) {
    let mut detector = BeatDetector::default();
    let spectra: Vec<Vec<u8>> = (0..16).map(test_spectrum).collect();

    let mut tick = 0usize;
    c.bench_function("detect_beat_1024_bins", |b| {
        b.iter(|| {
            tick += 1;
            let spectrum = spectra[tick % spectra.len()].as_slice();
            black_box(detector.detect_beat_at(black_box(spectrum), tick as f64 * 16.7))
        })
    });
}

criterion_group!(benches, bench_analyze, bench_detect_beat);
criterion_main!(benches);
