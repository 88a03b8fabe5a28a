//! Waveform engine configuration
//!
//! Every tunable constant of the cache, peak detector, signal pipeline and
//! lifecycle lives in [`WaveformConfig`]. Values load from YAML with
//! `#[serde(default)]`, so a partial file only overrides what it names.
//!
//! ```ignore
//! use recall_waveform::config::{default_config_path, WaveformConfig};
//!
//! let config = WaveformConfig::load(&default_config_path());
//! ```

mod io;
mod paths;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{DEFAULT_PIXELS_PER_SECOND, PREFETCH_COUNT};

pub use io::{load_config, save_config};
pub use paths::{app_config_dir, default_config_path};

/// Tunables for one open waveform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformConfig {
    /// Segments prefetched on each side of the visible range
    /// Default: 10
    pub prefetch_count: u32,

    /// Cache capacity multiplier over visible + prefetch segments
    /// Default: 1.5
    pub cache_buffer_factor: f64,

    /// Minimum spare slots over visible + prefetch segments
    /// Default: 10
    pub cache_min_headroom: usize,

    /// Spacing of peak sampling windows across the file, in seconds
    /// Default: 5.0
    pub sample_interval_seconds: f64,

    /// Lower bound for any detected peak (keeps silence from blowing up)
    /// Default: 0.01
    pub min_peak: f64,

    /// Peak used when detection fails outright
    /// Default: 0.1
    pub default_peak: f64,

    /// Ratio between pre-warmed zoom levels
    /// Default: 1.5
    pub zoom_factor: f64,

    /// Pre-warmed zoom levels on each side of the default resolution
    /// Default: 2
    pub zoom_levels: u32,

    /// Centre resolution for peak pre-warming
    /// Default: 200
    pub default_pixels_per_second: u32,

    /// Band-pass lower edge as a fraction of the sample rate
    /// Default: 0.001
    pub band_min: f64,

    /// Band-pass upper edge as a fraction of the sample rate
    /// Default: 0.45
    pub band_max: f64,

    /// Audio prepended to each chunk after the first, in seconds
    /// Default: 0.25
    pub overlap_seconds: f64,

    /// Envelope smoothing window in samples
    /// Default: 20
    pub envelope_window: usize,

    /// Drawn columns between cancellation checks
    /// Default: 10
    pub cancel_check_stride: usize,

    /// Graceful pool shutdown wait before forcing, in milliseconds
    /// Default: 5000
    pub shutdown_grace_ms: u64,

    /// Interval of the debug stats report, in milliseconds (0 disables)
    /// Default: 1000
    pub stats_log_interval_ms: u64,

    /// Render worker count; 0 means `max(1, cores - 1)`
    /// Default: 0
    pub render_threads: usize,
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            prefetch_count: PREFETCH_COUNT,
            cache_buffer_factor: 1.5,
            cache_min_headroom: 10,
            sample_interval_seconds: 5.0,
            min_peak: 0.01,
            default_peak: 0.1,
            zoom_factor: 1.5,
            zoom_levels: 2,
            default_pixels_per_second: DEFAULT_PIXELS_PER_SECOND,
            band_min: 0.001,
            band_max: 0.45,
            overlap_seconds: 0.25,
            envelope_window: 20,
            cancel_check_stride: 10,
            shutdown_grace_ms: 5000,
            stats_log_interval_ms: 1000,
            render_threads: 0,
        }
    }
}

impl WaveformConfig {
    /// Load from YAML (defaults on any problem) and clamp bad values
    pub fn load(path: &Path) -> Self {
        load_config::<Self>(path).validated()
    }

    /// Clamp nonsensical values back into a usable range
    ///
    /// Anything that is not a positive finite number where one is required
    /// falls back to its default.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();

        fn positive(value: f64, fallback: f64) -> f64 {
            if value.is_finite() && value > 0.0 {
                value
            } else {
                fallback
            }
        }

        self.cache_buffer_factor = positive(self.cache_buffer_factor, defaults.cache_buffer_factor)
            .max(1.0);
        self.sample_interval_seconds =
            positive(self.sample_interval_seconds, defaults.sample_interval_seconds);
        self.min_peak = positive(self.min_peak, defaults.min_peak);
        self.default_peak = positive(self.default_peak, defaults.default_peak).max(self.min_peak);
        self.zoom_factor = positive(self.zoom_factor, defaults.zoom_factor);
        if self.zoom_factor <= 1.0 {
            self.zoom_factor = defaults.zoom_factor;
        }
        if self.default_pixels_per_second == 0 {
            self.default_pixels_per_second = defaults.default_pixels_per_second;
        }

        self.band_min = positive(self.band_min, defaults.band_min).min(0.49);
        self.band_max = positive(self.band_max, defaults.band_max).min(0.49);
        if self.band_min >= self.band_max {
            log::warn!(
                "[CONFIG] band_min {} >= band_max {}, using default band",
                self.band_min,
                self.band_max
            );
            self.band_min = defaults.band_min;
            self.band_max = defaults.band_max;
        }

        if !self.overlap_seconds.is_finite() || self.overlap_seconds < 0.0 {
            self.overlap_seconds = defaults.overlap_seconds;
        }
        self.envelope_window = self.envelope_window.max(1);
        self.cancel_check_stride = self.cancel_check_stride.max(1);
        self
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// `None` when periodic reporting is disabled
    pub fn stats_log_interval(&self) -> Option<Duration> {
        (self.stats_log_interval_ms > 0).then(|| Duration::from_millis(self.stats_log_interval_ms))
    }

    /// Number of render workers to spawn
    pub fn render_thread_count(&self) -> usize {
        if self.render_threads > 0 {
            return self.render_threads;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        cores.saturating_sub(1).max(1)
    }

    /// Resolutions whose peaks are computed up front
    ///
    /// The default resolution plus `zoom_levels` steps in and out by
    /// `zoom_factor`, rounded, deduplicated, never zero.
    pub fn prewarm_resolutions(&self) -> Vec<u32> {
        let base = self.default_pixels_per_second as f64;
        let mut resolutions = vec![self.default_pixels_per_second];
        for level in 1..=self.zoom_levels as i32 {
            let scale = self.zoom_factor.powi(level);
            resolutions.push((base * scale).round() as u32);
            resolutions.push((base / scale).round().max(1.0) as u32);
        }
        resolutions.sort_unstable();
        resolutions.dedup();
        resolutions
    }
}
