//! In-memory sample sources shared by unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::signal::{AudioMetadata, SampleSource};
use crate::types::STANDARD_CHUNK_DURATION_SECONDS;

type LevelFn = Box<dyn Fn(f64) -> f64 + Send + Sync>;

/// Source whose amplitude is a function of absolute time
pub(crate) struct FakeSource {
    duration_seconds: f64,
    level: LevelFn,
    delay: Duration,
    panics: bool,
    pub calls: AtomicUsize,
    pub closed: AtomicBool,
}

impl FakeSource {
    pub fn constant(duration_seconds: f64, level: f64) -> Self {
        Self::with_level(duration_seconds, move |_| level)
    }

    pub fn with_level(duration_seconds: f64, level: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            duration_seconds,
            level: Box::new(level),
            delay: Duration::ZERO,
            panics: false,
            calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Sleep this long in every chunk request
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Panic in every chunk request
    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SampleSource for FakeSource {
    fn process_audio_for_display(&self, chunk_index: u64, target_pixel_width: usize) -> Vec<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("decoder crashed on chunk {}", chunk_index);
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let chunk_start = chunk_index as f64 * STANDARD_CHUNK_DURATION_SECONDS;
        let seconds_per_pixel = STANDARD_CHUNK_DURATION_SECONDS / target_pixel_width as f64;
        (0..target_pixel_width)
            .map(|i| {
                let t = chunk_start + i as f64 * seconds_per_pixel;
                if t < self.duration_seconds {
                    (self.level)(t)
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn metadata(&self) -> AudioMetadata {
        AudioMetadata {
            duration_seconds: self.duration_seconds,
            sample_rate: 44_100,
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
