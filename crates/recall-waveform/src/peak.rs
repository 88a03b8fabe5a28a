//! Global peak detection
//!
//! Every segment of a file is scaled by the same peak for a given zoom level,
//! otherwise strips rendered at different times would not line up
//! vertically. The peak is the largest amplitude the renderer would actually
//! draw (two consecutive pixels), sampled across the whole file.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use rayon::prelude::*;

use crate::config::WaveformConfig;
use crate::error::{WaveformError, WaveformResult};
use crate::signal::{PixelScaler, SampleSource};
use crate::types::STANDARD_CHUNK_DURATION_SECONDS;

/// Set exactly once per resolution; concurrent callers wait on it
type PeakCell = Arc<OnceLock<f64>>;

/// Per-resolution peak cache for one audio file
pub struct PeakDetector {
    source: Arc<dyn SampleSource>,
    peaks: Mutex<HashMap<u32, PeakCell>>,
    /// Dedicated workers for chunk sampling, separate from the render pool
    sampler: rayon::ThreadPool,
    sample_interval_seconds: f64,
    min_peak: f64,
    default_peak: f64,
    prewarm: Vec<u32>,
}

impl std::fmt::Debug for PeakDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeakDetector")
            .field("resolutions", &self.cached_resolutions())
            .finish()
    }
}

impl PeakDetector {
    pub fn new(source: Arc<dyn SampleSource>, config: &WaveformConfig) -> WaveformResult<Self> {
        let config = config.clone().validated();
        let sampler = rayon::ThreadPoolBuilder::new()
            .num_threads(config.render_thread_count())
            .thread_name(|i| format!("waveform-peak-{}", i))
            .build()
            .map_err(|e| WaveformError::Pool(e.to_string()))?;

        Ok(Self {
            source,
            peaks: Mutex::new(HashMap::new()),
            sampler,
            sample_interval_seconds: config.sample_interval_seconds,
            min_peak: config.min_peak,
            default_peak: config.default_peak,
            prewarm: config.prewarm_resolutions(),
        })
    }

    /// Compute peaks for the common zoom levels
    pub fn initialize(&self) {
        log::info!(
            "[PEAK] Pre-computing peaks for {} resolutions: {:?}",
            self.prewarm.len(),
            self.prewarm
        );
        for &pps in &self.prewarm {
            let peak = *self
                .cell(pps)
                .get_or_init(|| self.calculate_global_peak(pps));
            log::trace!("[PEAK] {}px/s -> {}", pps, peak);
        }
    }

    /// Peak for `pixels_per_second`, computed on first use
    ///
    /// Each resolution is scanned once. Callers racing on a resolution that
    /// is still being computed wait for that result; other resolutions are
    /// not blocked.
    pub fn get_peak(&self, pixels_per_second: u32) -> f64 {
        *self.cell(pixels_per_second).get_or_init(|| {
            log::debug!(
                "[PEAK] {}px/s not pre-computed, calculating on demand",
                pixels_per_second
            );
            self.calculate_global_peak(pixels_per_second)
        })
    }

    /// Drop every memoized peak and pre-compute again
    pub fn reset(&self) {
        log::info!("[PEAK] Resetting peak cache");
        self.lock().clear();
        self.initialize();
    }

    /// Resolutions with a computed peak, ascending
    pub fn cached_resolutions(&self) -> Vec<u32> {
        let mut resolutions: Vec<u32> = self
            .lock()
            .iter()
            .filter(|(_, cell)| cell.get().is_some())
            .map(|(&pps, _)| pps)
            .collect();
        resolutions.sort_unstable();
        resolutions
    }

    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|cell| cell.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The map lock is held only to fetch the cell, never while computing
    fn cell(&self, pixels_per_second: u32) -> PeakCell {
        Arc::clone(self.lock().entry(pixels_per_second).or_default())
    }

    fn calculate_global_peak(&self, pixels_per_second: u32) -> f64 {
        let duration = self.source.metadata().duration_seconds;

        // Windows every `sample_interval_seconds`; several windows can fall in
        // the same chunk, which only needs processing once
        let mut chunks: Vec<u64> = Vec::new();
        if duration.is_finite() && self.sample_interval_seconds > 0.0 {
            let mut t = 0.0;
            while t < duration {
                let chunk = (t / STANDARD_CHUNK_DURATION_SECONDS) as u64;
                if chunks.last() != Some(&chunk) {
                    chunks.push(chunk);
                }
                t += self.sample_interval_seconds;
            }
        }

        let chunk_count = chunks.len();
        let width = (STANDARD_CHUNK_DURATION_SECONDS * pixels_per_second as f64) as usize;
        let skip = (pixels_per_second as usize / 2).max(1);
        let source = Arc::clone(&self.source);

        // The caller blocks on a channel, not inside rayon: a render worker
        // waiting here must not pick up other render jobs meanwhile
        let (tx, rx) = crossbeam::channel::bounded(1);
        self.sampler.spawn(move || {
            let sampled = catch_unwind(AssertUnwindSafe(|| {
                chunks
                    .par_iter()
                    .map(|&chunk| {
                        let pixels = source.process_audio_for_display(chunk, width);
                        let peak = PixelScaler::rendering_peak(&pixels, skip);
                        log::trace!("[PEAK] chunk {} at {}px/s: {}", chunk, pixels_per_second, peak);
                        peak
                    })
                    .reduce(|| 0.0, f64::max)
            }));
            let _ = tx.send(sampled.ok());
        });

        let peak = match rx.recv().ok().flatten() {
            Some(peak) => peak,
            None => {
                log::error!(
                    "[PEAK] Peak calculation failed for {}px/s, using default {}",
                    pixels_per_second,
                    self.default_peak
                );
                return self.default_peak;
            }
        };

        if !(peak >= self.min_peak) {
            log::warn!(
                "[PEAK] Peak {} below minimum at {}px/s, using {}",
                peak,
                pixels_per_second,
                self.min_peak
            );
            return self.min_peak;
        }

        log::trace!(
            "[PEAK] {}px/s: {} from {} chunks over {:.1}s",
            pixels_per_second,
            peak,
            chunk_count,
            duration
        );
        peak
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, PeakCell>> {
        self.peaks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSource;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn detector(source: FakeSource) -> (Arc<FakeSource>, PeakDetector) {
        let source = Arc::new(source);
        let detector = PeakDetector::new(source.clone(), &WaveformConfig::default()).unwrap();
        (source, detector)
    }

    #[test]
    fn test_peak_of_constant_source() {
        let (_, detector) = detector(FakeSource::constant(30.0, 0.6));
        assert_eq!(detector.get_peak(200), 0.6);
    }

    #[test]
    fn test_lone_spike_does_not_set_scale() {
        // One pixel-wide spike at 12s on a 0.3 floor (200pps: 1 pixel = 5ms)
        let (_, detector) = detector(FakeSource::with_level(20.0, |t| {
            if (t - 12.0).abs() < 0.002 {
                1.0
            } else {
                0.3
            }
        }));
        assert_eq!(detector.get_peak(200), 0.3);
    }

    #[test]
    fn test_loudest_chunk_wins() {
        let (_, detector) =
            detector(FakeSource::with_level(35.0, |t| if t >= 20.0 { 0.9 } else { 0.2 }));
        assert_eq!(detector.get_peak(100), 0.9);
    }

    #[test]
    fn test_silence_is_clamped_to_floor() {
        let (_, detector) = detector(FakeSource::constant(12.0, 0.0));
        assert_eq!(detector.get_peak(200), 0.01);
    }

    #[test]
    fn test_empty_file_gives_floor() {
        let (source, detector) = detector(FakeSource::constant(0.0, 0.5));
        assert_eq!(detector.get_peak(200), 0.01);
        assert_eq!(source.calls(), 0);
    }

    #[test]
    fn test_failure_falls_back_to_default() {
        let (_, detector) = detector(FakeSource::constant(10.0, 0.5).panicking());
        assert_eq!(detector.get_peak(200), 0.1);
    }

    #[test]
    fn test_on_demand_is_memoized() {
        let (source, detector) = detector(FakeSource::constant(30.0, 0.4));
        let first = detector.get_peak(123);
        let calls = source.calls();
        // 0, 5, ..., 25s -> chunks 0, 1, 2
        assert_eq!(calls, 3);

        let second = detector.get_peak(123);
        assert_eq!(first.to_bits(), second.to_bits());
        assert_eq!(source.calls(), calls);
        assert_eq!(detector.cached_resolutions(), vec![123]);
    }

    #[test]
    fn test_cold_resolution_scanned_once_under_contention() {
        let (source, detector) =
            detector(FakeSource::constant(60.0, 0.4).slow(Duration::from_millis(20)));
        let detector = Arc::new(detector);
        let barrier = Arc::new(Barrier::new(4));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let detector = Arc::clone(&detector);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    detector.get_peak(123)
                })
            })
            .collect();
        let peaks: Vec<f64> = workers.into_iter().map(|w| w.join().unwrap()).collect();

        assert!(peaks.iter().all(|&p| p == 0.4));
        // 0, 5, ..., 55s -> chunks 0..=5, each read once
        assert_eq!(source.calls(), 6);
    }

    #[test]
    fn test_invalid_interval_is_replaced() {
        let config = WaveformConfig {
            sample_interval_seconds: 0.0,
            ..Default::default()
        };
        let source = Arc::new(FakeSource::constant(30.0, 0.5));
        let detector = PeakDetector::new(source.clone(), &config).unwrap();
        // Falls back to the default 5s interval instead of looping forever
        assert_eq!(detector.get_peak(200), 0.5);
        assert_eq!(source.calls(), 3);
    }

    #[test]
    fn test_initialize_and_reset() {
        let (source, detector) = detector(FakeSource::constant(10.0, 0.5));
        detector.initialize();
        assert_eq!(detector.cached_resolutions(), vec![89, 133, 200, 300, 450]);
        let calls = source.calls();

        // Pre-warmed: no extra work
        assert_eq!(detector.get_peak(300), 0.5);
        assert_eq!(source.calls(), calls);

        detector.get_peak(1000);
        assert_eq!(detector.len(), 6);
        detector.reset();
        assert_eq!(detector.len(), 5);
    }
}
