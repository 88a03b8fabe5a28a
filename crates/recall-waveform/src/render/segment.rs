//! Rendering one 200px strip

use crate::error::RenderError;
use crate::handle::CancelToken;
use crate::image::{Color, SegmentImage, GLYPH_HEIGHT};
use crate::signal::SampleSource;
use crate::types::{SegmentKey, SEGMENT_WIDTH_PX, STANDARD_CHUNK_DURATION_SECONDS};

const TICK_EPSILON: f64 = 1e-9;

/// Where a segment's pixels live inside the processed chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkLocation {
    pub chunk_index: u64,
    /// First pixel of the segment within the chunk data (negative before 0s)
    pub pixel_offset: i64,
    /// Pixel width of a whole chunk at this resolution
    pub chunk_width: usize,
}

impl ChunkLocation {
    /// Integer pixel arithmetic, so strips never drift by a rounding pixel
    pub fn of(key: &SegmentKey) -> Self {
        let chunk_width = (STANDARD_CHUNK_DURATION_SECONDS as i64) * key.pixels_per_second as i64;
        let start_pixel = key.segment_index * SEGMENT_WIDTH_PX as i64;
        if start_pixel >= 0 {
            let chunk_index = start_pixel / chunk_width;
            Self {
                chunk_index: chunk_index as u64,
                pixel_offset: start_pixel - chunk_index * chunk_width,
                chunk_width: chunk_width as usize,
            }
        } else {
            // Straddles 0s: read chunk 0, leading pixels stay silent
            Self {
                chunk_index: 0,
                pixel_offset: start_pixel,
                chunk_width: chunk_width as usize,
            }
        }
    }
}

/// Fetch the segment's amplitudes and draw it
pub(crate) fn render_segment(
    key: &SegmentKey,
    source: &dyn SampleSource,
    peak: impl FnOnce() -> f64,
    cancel_check_stride: usize,
    token: &CancelToken,
) -> Result<SegmentImage, RenderError> {
    token.check()?;

    let location = ChunkLocation::of(key);
    let chunk = source.process_audio_for_display(location.chunk_index, location.chunk_width);
    token.check()?;

    let values: Vec<f64> = (0..SEGMENT_WIDTH_PX as i64)
        .map(|i| {
            let index = location.pixel_offset + i;
            if index < 0 {
                0.0
            } else {
                chunk.get(index as usize).copied().unwrap_or(0.0)
            }
        })
        .collect();

    let peak = peak();
    token.check()?;
    draw_segment(key, &values, peak, cancel_check_stride, token)
}

/// Draw background, reference line, time scale and waveform
pub(crate) fn draw_segment(
    key: &SegmentKey,
    values: &[f64],
    peak: f64,
    cancel_check_stride: usize,
    token: &CancelToken,
) -> Result<SegmentImage, RenderError> {
    let height = key.height;
    let mut image = SegmentImage::new(SEGMENT_WIDTH_PX, height, Color::WHITE);
    let center = (height / 2) as i64;

    image.hline(center, 0, SEGMENT_WIDTH_PX as i64 - 1, Color::BLACK);
    draw_time_scale(&mut image, key.start_time(), key.pixels_per_second);

    let y_scale = if peak > 0.0 {
        let scale = ((height / 2) as f64 - 1.0) / peak;
        if scale.is_finite() {
            scale
        } else {
            0.0
        }
    } else {
        0.0
    };
    log::trace!(
        "[RENDER] Segment {} scaling: height={}, peak={}, y_scale={}",
        key.segment_index,
        height,
        peak,
        y_scale
    );

    let stride = cancel_check_stride.max(1);
    for (x, value) in values.iter().take(SEGMENT_WIDTH_PX as usize).enumerate() {
        if x % stride == 0 {
            token.check()?;
        }
        let scaled = value * y_scale;
        if !scaled.is_finite() {
            continue;
        }
        let top = (center as f64 - scaled) as i64;
        let bottom = (center as f64 + scaled) as i64;
        image.vline(x as i64, center, top, Color::BLACK);
        image.vline(x as i64, center, bottom, Color::BLACK);
    }

    Ok(image)
}

/// Gridlines on absolute whole seconds with `"{:.2}s"` labels
fn draw_time_scale(image: &mut SegmentImage, start_seconds: f64, pixels_per_second: u32) {
    if pixels_per_second == 0 {
        return;
    }
    let width = image.width() as i64;
    let height = image.height() as i64;

    let start_floor = (start_seconds + TICK_EPSILON).floor();
    let first_second = if (start_seconds - start_floor).abs() <= TICK_EPSILON {
        start_floor
    } else {
        start_floor + 1.0
    };

    let mut x = ((first_second - start_seconds) * pixels_per_second as f64).round() as i64;
    let mut tick = first_second;
    while x < width {
        image.vline(x, 0, height - 1, Color::GRID);
        let label_top = height - 5 - GLYPH_HEIGHT as i64;
        image.draw_text(x + 5, label_top, &format!("{:.2}s", tick), Color::BLACK);
        x += pixels_per_second as i64;
        tick += 1.0;
    }
}
