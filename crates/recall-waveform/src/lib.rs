//! Recall Waveform - segment-cached waveform rendering
//!
//! Renders the waveform strip of a speech annotation timeline. Audio is cut
//! into fixed 200px segments per zoom level; segments are rendered on a
//! bounded worker pool, kept in a small circular cache and composited into
//! one image per viewport.
//!
//! # Architecture
//!
//! ```text
//! WaveformManager ── Waveform (one per open file)
//!                      ├── Renderer ──── RenderPool (rayon, 3 priority tiers)
//!                      ├── SegmentCache ─ CacheStats
//!                      ├── PeakDetector
//!                      └── SampleSource (WaveformProcessor<WavSampleReader>)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use recall_waveform::{config::WaveformConfig, ViewportSpec, WaveformManager};
//!
//! let manager = WaveformManager::new(WaveformConfig::default());
//! let waveform = manager.open_wav("session-01.wav")?;
//!
//! let viewport = ViewportSpec::new(0.0, 5.0, 1000, 200, 200)?;
//! let handle = waveform.render_viewport(&viewport);
//! if let Ok(Some(image)) = handle.wait() {
//!     // image.as_rgba() -> upload to the GUI toolkit
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod handle;
pub mod image;
pub mod manager;
pub mod peak;
pub mod render;
pub mod signal;
pub mod types;
pub mod waveform;

#[cfg(test)]
mod testing;

pub use cache::{CacheStats, CacheStatsSnapshot, SegmentCache, SegmentHandle};
pub use config::WaveformConfig;
pub use error::{RenderError, SampleReadError, WaveformError, WaveformResult};
pub use handle::{CancelToken, RenderHandle, RenderOutcome};
pub use image::{Color, SegmentImage};
pub use manager::WaveformManager;
pub use peak::PeakDetector;
pub use render::{Priority, RenderPool, Renderer};
pub use signal::{AudioMetadata, SampleReader, SampleSource, WavSampleReader, WaveformProcessor};
pub use types::{SegmentKey, ViewportSpec, DEFAULT_PIXELS_PER_SECOND, PREFETCH_COUNT, SEGMENT_WIDTH_PX};
pub use waveform::{StatsReporter, Waveform};
