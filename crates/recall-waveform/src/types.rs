//! Viewport and segment value types
//!
//! A `ViewportSpec` describes what the timeline wants painted. The renderer
//! splits it into fixed-width `SegmentKey` strips, which are the unit of
//! caching.

use crate::error::WaveformError;

/// Width of one cached waveform strip in pixels
pub const SEGMENT_WIDTH_PX: u32 = 200;

/// Segments to prefetch in each direction beyond the visible range
pub const PREFETCH_COUNT: u32 = 10;

/// Duration of one processed audio chunk (segments are cut out of these)
pub const STANDARD_CHUNK_DURATION_SECONDS: f64 = 10.0;

/// Default horizontal resolution (~5 seconds on a 1000px canvas)
pub const DEFAULT_PIXELS_PER_SECOND: u32 = 200;

/// What the timeline wants rendered
///
/// Immutable: every zoom, scroll or resize produces a new value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportSpec {
    pub start_time_seconds: f64,
    pub end_time_seconds: f64,
    pub viewport_width_px: u32,
    pub viewport_height_px: u32,
    pub pixels_per_second: u32,
}

impl ViewportSpec {
    /// Create a validated viewport
    ///
    /// Requires `end > start`, a non-zero size and `pixels_per_second > 0`.
    pub fn new(
        start_time_seconds: f64,
        end_time_seconds: f64,
        viewport_width_px: u32,
        viewport_height_px: u32,
        pixels_per_second: u32,
    ) -> Result<Self, WaveformError> {
        if !start_time_seconds.is_finite() || !end_time_seconds.is_finite() {
            return Err(WaveformError::InvalidViewport(format!(
                "non-finite time range {}..{}",
                start_time_seconds, end_time_seconds
            )));
        }
        if end_time_seconds <= start_time_seconds {
            return Err(WaveformError::InvalidViewport(format!(
                "end {}s must be after start {}s",
                end_time_seconds, start_time_seconds
            )));
        }
        if pixels_per_second == 0 {
            return Err(WaveformError::InvalidViewport(
                "pixels_per_second must be > 0".to_string(),
            ));
        }
        if viewport_width_px == 0 || viewport_height_px == 0 {
            return Err(WaveformError::InvalidViewport(format!(
                "empty viewport {}x{}",
                viewport_width_px, viewport_height_px
            )));
        }

        Ok(Self {
            start_time_seconds,
            end_time_seconds,
            viewport_width_px,
            viewport_height_px,
            pixels_per_second,
        })
    }

    /// Viewport used before the UI has reported its real size
    pub fn initial() -> Self {
        Self {
            start_time_seconds: 0.0,
            end_time_seconds: 10.0,
            viewport_width_px: 1000,
            viewport_height_px: 200,
            pixels_per_second: 100,
        }
    }

    /// Duration covered by the viewport in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.end_time_seconds - self.start_time_seconds
    }

    /// Number of segments needed to span the viewport width
    pub fn visible_segment_count(&self) -> usize {
        self.viewport_width_px.div_ceil(SEGMENT_WIDTH_PX) as usize
    }

    /// Inclusive range of segment indices covering the time range
    ///
    /// Floor of the start up to (but excluding) the ceiling of the end: a
    /// viewport ending exactly on a boundary does not pull in the segment
    /// that begins there.
    pub fn segment_range(&self) -> (i64, i64) {
        let pps = self.pixels_per_second as f64;
        let width = SEGMENT_WIDTH_PX as f64;
        let first = (self.start_time_seconds * pps / width).floor() as i64;
        let end = (self.end_time_seconds * pps / width).ceil() as i64;
        (first, (end - 1).max(first))
    }

    /// Key for a segment at this viewport's resolution and height
    pub fn segment_key(&self, segment_index: i64) -> SegmentKey {
        SegmentKey::new(segment_index, self.pixels_per_second, self.viewport_height_px)
    }

    /// Whether a cache built for `other` holds entries valid for this viewport
    pub fn same_resolution(&self, other: &ViewportSpec) -> bool {
        self.pixels_per_second == other.pixels_per_second
            && self.viewport_height_px == other.viewport_height_px
    }
}

/// Identity of one cached strip
///
/// Equal only when index, resolution and height all match, so a zoom or a
/// height change never reuses a stale strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    pub segment_index: i64,
    pub pixels_per_second: u32,
    pub height: u32,
}

impl SegmentKey {
    pub fn new(segment_index: i64, pixels_per_second: u32, height: u32) -> Self {
        Self {
            segment_index,
            pixels_per_second,
            height,
        }
    }

    /// Seconds covered by one segment at this resolution
    pub fn duration(&self) -> f64 {
        SEGMENT_WIDTH_PX as f64 / self.pixels_per_second as f64
    }

    /// Start time in seconds (negative before the start of the audio)
    pub fn start_time(&self) -> f64 {
        (self.segment_index * SEGMENT_WIDTH_PX as i64) as f64 / self.pixels_per_second as f64
    }

    pub fn end_time(&self) -> f64 {
        self.start_time() + self.duration()
    }

    /// True when the whole segment lies before time 0
    pub fn is_before_audio(&self) -> bool {
        self.end_time() <= 0.0
    }
}

impl std::fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "segment {} ({:.2}s at {}pps, h={})",
            self.segment_index,
            self.start_time(),
            self.pixels_per_second,
            self.height
        )
    }
}
