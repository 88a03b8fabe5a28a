//! Viewport rendering
//!
//! `Renderer::render_viewport` splits a viewport into segment keys, reuses
//! or starts a render per key, composites the visible strips into one image
//! once they have all resolved, and queues prefetch for the strips on either
//! side. Nothing here blocks the caller.
//!
//! # Scheduling
//!
//! ```text
//! render_viewport
//!   ├─ visible segments      Priority::Visible
//!   ├─ prefetch job          Priority::PrefetchScrollDirection
//!   │    ├─ last+1 ..= last+N    Priority::PrefetchScrollDirection
//!   │    └─ first-1 ..= first-N  Priority::PrefetchOppositeDirection
//!   └─ composite             runs on whichever thread finishes the last strip
//! ```

mod pool;
mod segment;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cache::{SegmentCache, SegmentHandle};
use crate::config::WaveformConfig;
use crate::error::RenderError;
use crate::handle::{CancelToken, RenderHandle};
use crate::image::{Color, SegmentImage};
use crate::peak::PeakDetector;
use crate::signal::SampleSource;
use crate::types::{SegmentKey, ViewportSpec, SEGMENT_WIDTH_PX};

pub use pool::{Priority, RenderPool};

/// Everything a render job needs, shared by all jobs of one waveform
struct RenderContext {
    cache: Arc<SegmentCache>,
    peaks: Arc<PeakDetector>,
    source: Arc<dyn SampleSource>,
    pool: Arc<RenderPool>,
    shutdown: CancelToken,
    prefetch_count: i64,
    cancel_check_stride: usize,
}

/// Turns viewports into composite images via the segment cache
pub struct Renderer {
    ctx: Arc<RenderContext>,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("shut_down", &self.ctx.shutdown.is_cancelled())
            .finish()
    }
}

impl Renderer {
    pub fn new(
        cache: Arc<SegmentCache>,
        peaks: Arc<PeakDetector>,
        source: Arc<dyn SampleSource>,
        pool: Arc<RenderPool>,
        config: &WaveformConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(RenderContext {
                cache,
                peaks,
                source,
                pool,
                shutdown: CancelToken::new(),
                prefetch_count: config.prefetch_count as i64,
                cancel_check_stride: config.cancel_check_stride,
            }),
        }
    }

    /// Start rendering `viewport`; the returned handle resolves to the
    /// composite (or `None` if the renderer was shut down first)
    pub fn render_viewport(&self, viewport: &ViewportSpec) -> SegmentHandle {
        let ctx = &self.ctx;
        ctx.cache.update_viewport(viewport);

        let (first, last) = viewport.segment_range();
        log::trace!(
            "[RENDER] Viewport {:.2}s..{:.2}s at {}pps -> segments {}..={}",
            viewport.start_time_seconds,
            viewport.end_time_seconds,
            viewport.pixels_per_second,
            first,
            last
        );

        let handles: Vec<SegmentHandle> = (first..=last)
            .map(|index| ctx.segment_handle(viewport.segment_key(index), Priority::Visible, true))
            .collect();

        self.schedule_prefetch(viewport, first, last);
        composite_when_ready(Arc::clone(ctx), *viewport, first, handles)
    }

    /// Cancel everything this renderer has in flight or will schedule
    pub fn shutdown(&self) {
        self.ctx.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.ctx.shutdown.is_cancelled()
    }

    fn schedule_prefetch(&self, viewport: &ViewportSpec, first: i64, last: i64) {
        let ctx = Arc::clone(&self.ctx);
        let viewport = *viewport;
        self.ctx.pool.submit(
            Priority::PrefetchScrollDirection,
            move || {
                if ctx.shutdown.is_cancelled() {
                    log::trace!("[RENDER] Prefetch skipped, renderer shut down");
                    return;
                }
                let n = ctx.prefetch_count;
                for index in last + 1..=last + n {
                    ctx.segment_handle(
                        viewport.segment_key(index),
                        Priority::PrefetchScrollDirection,
                        false,
                    );
                }
                for index in (first - n..first).rev().filter(|&i| i >= 0) {
                    ctx.segment_handle(
                        viewport.segment_key(index),
                        Priority::PrefetchOppositeDirection,
                        false,
                    );
                }
            },
            || {},
        );
    }
}

impl RenderContext {
    /// Cached handle for `key`, or a freshly stored pending one with its
    /// render queued
    fn segment_handle(self: &Arc<Self>, key: SegmentKey, priority: Priority, record_stats: bool) -> SegmentHandle {
        if key.is_before_audio() {
            // Nothing to draw; still cached so the lookup is a hit next time
            let blank = RenderHandle::resolved_with(None);
            return self
                .cache
                .get_or_put(key, record_stats, || blank.clone())
                .map(|(handle, _)| handle)
                .unwrap_or(blank);
        }

        let Some((handle, inserted)) =
            self.cache.get_or_put(key, record_stats, RenderHandle::pending)
        else {
            // Cache not initialized: render uncached rather than not at all
            let handle = RenderHandle::pending();
            self.submit_segment(key, priority, handle.clone());
            return handle;
        };

        if inserted {
            self.submit_segment(key, priority, handle.clone());
        }
        handle
    }

    fn submit_segment(self: &Arc<Self>, key: SegmentKey, priority: Priority, handle: SegmentHandle) {
        let ctx = Arc::clone(self);
        let job_handle = handle.clone();
        self.pool.submit(
            priority,
            move || {
                let token = job_handle.token();
                if ctx.shutdown.is_cancelled() {
                    job_handle.cancel();
                    return;
                }
                let result = catch_unwind(AssertUnwindSafe(|| {
                    segment::render_segment(
                        &key,
                        ctx.source.as_ref(),
                        || ctx.peaks.get_peak(key.pixels_per_second),
                        ctx.cancel_check_stride,
                        &token,
                    )
                }))
                .unwrap_or_else(|_| Err(RenderError::Failed(format!("panic rendering {}", key))));

                let outcome = match result {
                    Ok(image) => Ok(Some(Arc::new(image))),
                    Err(e) => Err(e),
                };
                job_handle.complete(outcome);
            },
            move || {
                handle.cancel();
            },
        );
    }
}

/// Resolve a composite handle once every visible strip has resolved
fn composite_when_ready(
    ctx: Arc<RenderContext>,
    viewport: ViewportSpec,
    first: i64,
    handles: Vec<SegmentHandle>,
) -> SegmentHandle {
    let composite = RenderHandle::pending();
    let handles = Arc::new(handles);
    let remaining = Arc::new(AtomicUsize::new(handles.len()));

    for handle in handles.iter() {
        let ctx = Arc::clone(&ctx);
        let handles = Arc::clone(&handles);
        let remaining = Arc::clone(&remaining);
        let composite = composite.clone();
        handle.on_complete(move |_| {
            if remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
                return;
            }
            if ctx.shutdown.is_cancelled() {
                composite.complete(Ok(None));
                return;
            }
            let segments: Vec<Option<Arc<SegmentImage>>> = handles
                .iter()
                .enumerate()
                .map(|(i, h)| segment_image(h, first + i as i64))
                .collect();
            let image = composite_segments(&segments, &viewport, first);
            composite.complete(Ok(Some(Arc::new(image))));
        });
    }
    composite
}

/// Image of a resolved visible strip; failures become blank space
fn segment_image(handle: &SegmentHandle, index: i64) -> Option<Arc<SegmentImage>> {
    match handle.try_outcome() {
        Some(Ok(image)) => image,
        Some(Err(RenderError::Cancelled)) => {
            log::debug!("[RENDER] Segment {} was cancelled, leaving blank", index);
            None
        }
        Some(Err(e)) => {
            log::warn!("[RENDER] Segment {} failed: {}", index, e);
            None
        }
        None => None,
    }
}

/// Lay strips out left to right on a white canvas
///
/// The first strip is shifted left by however far the viewport starts into
/// it. Missing strips still take up their width.
pub(crate) fn composite_segments(
    segments: &[Option<Arc<SegmentImage>>],
    viewport: &ViewportSpec,
    first: i64,
) -> SegmentImage {
    let width = viewport.viewport_width_px;
    let height = viewport.viewport_height_px;
    let mut composite = SegmentImage::new(width, height, Color::WHITE);

    let pps = viewport.pixels_per_second as f64;
    let first_start = (first * SEGMENT_WIDTH_PX as i64) as f64 / pps;
    let mut x = ((first_start - viewport.start_time_seconds) * pps).round() as i64;

    for segment in segments {
        if x >= width as i64 {
            break;
        }
        if let Some(image) = segment {
            let y = (height as i64 - image.height() as i64) / 2;
            if y != 0 {
                log::warn!(
                    "[RENDER] Height mismatch: viewport {}, segment {}",
                    height,
                    image.height()
                );
            }
            composite.blit(image, x, y);
        }
        x += SEGMENT_WIDTH_PX as i64;
    }
    composite
}
