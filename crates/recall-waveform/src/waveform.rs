//! One open audio file, ready to render
//!
//! `Waveform` owns every per-file component: the render pool, segment cache,
//! stats, peak detector and renderer. Nothing is shared between files, so
//! switching files is "shut the old one down, open a new one".

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};

use crate::cache::{CacheStats, CacheStatsSnapshot, SegmentCache, SegmentHandle};
use crate::config::WaveformConfig;
use crate::error::WaveformResult;
use crate::handle::RenderHandle;
use crate::peak::PeakDetector;
use crate::render::{Priority, RenderPool, Renderer};
use crate::signal::{AudioMetadata, SampleSource, WaveformProcessor};
use crate::types::ViewportSpec;

/// Background thread logging cache stats while the waveform is in use
pub struct StatsReporter {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl StatsReporter {
    /// Log `stats` at debug level every `interval`, skipping idle periods
    pub fn spawn(stats: Arc<CacheStats>, interval: Duration) -> WaveformResult<Self> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("waveform-stats".into())
            .spawn(move || {
                let ticker = channel::tick(interval);
                loop {
                    crossbeam::select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let snapshot = stats.snapshot();
                            if snapshot.requests > 0 {
                                log::debug!("[CACHE] {}", snapshot);
                            }
                        }
                    }
                }
                log::trace!("[CACHE] Stats reporter stopped");
            })?;

        Ok(Self {
            stop_tx,
            thread: Some(thread),
        })
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("[CACHE] Stats reporter thread panicked");
            }
        }
    }
}

impl Drop for StatsReporter {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Render facade for one open audio file
pub struct Waveform {
    source: Arc<dyn SampleSource>,
    cache: Arc<SegmentCache>,
    stats: Arc<CacheStats>,
    peaks: Arc<PeakDetector>,
    pool: Arc<RenderPool>,
    renderer: Renderer,
    reporter: Mutex<Option<StatsReporter>>,
    shut_down: AtomicBool,
    config: WaveformConfig,
}

impl std::fmt::Debug for Waveform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waveform")
            .field("metadata", &self.source.metadata())
            .field("pool", &self.pool)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl Waveform {
    /// Wire up rendering for `source`
    ///
    /// Peak pre-computation is queued on the render pool and does not delay
    /// the first render.
    pub fn open(source: Arc<dyn SampleSource>, config: WaveformConfig) -> WaveformResult<Self> {
        let config = config.validated();
        let pool = Arc::new(RenderPool::new(config.render_thread_count())?);

        let stats = Arc::new(CacheStats::new());
        let cache = Arc::new(SegmentCache::new(Arc::clone(&stats), &config));
        cache.initialize(&ViewportSpec::initial());

        let peaks = Arc::new(PeakDetector::new(Arc::clone(&source), &config)?);
        let renderer = Renderer::new(
            Arc::clone(&cache),
            Arc::clone(&peaks),
            Arc::clone(&source),
            Arc::clone(&pool),
            &config,
        );

        let warmup = Arc::clone(&peaks);
        pool.submit(
            Priority::PrefetchOppositeDirection,
            move || warmup.initialize(),
            || log::debug!("[PEAK] Warm-up dropped at shutdown"),
        );

        let reporter = match config.stats_log_interval() {
            Some(interval) => Some(StatsReporter::spawn(Arc::clone(&stats), interval)?),
            None => None,
        };

        let metadata = source.metadata();
        log::info!(
            "[WAVEFORM] Opened {:.2}s of audio at {} Hz with {} render threads",
            metadata.duration_seconds,
            metadata.sample_rate,
            pool.thread_count()
        );

        Ok(Self {
            source,
            cache,
            stats,
            peaks,
            pool,
            renderer,
            reporter: Mutex::new(reporter),
            shut_down: AtomicBool::new(false),
            config,
        })
    }

    /// Open a WAV file through the standard display pipeline
    pub fn open_wav(path: impl AsRef<Path>, config: WaveformConfig) -> WaveformResult<Self> {
        let processor = WaveformProcessor::open_wav(path, &config)?;
        Self::open(Arc::new(processor), config)
    }

    /// Render `viewport`; the handle resolves to the composite image
    ///
    /// After shutdown the handle is already resolved to `None`.
    pub fn render_viewport(&self, viewport: &ViewportSpec) -> SegmentHandle {
        if self.is_shut_down() {
            log::debug!("[WAVEFORM] render_viewport after shutdown");
            return RenderHandle::resolved_with(None);
        }
        self.renderer.render_viewport(viewport)
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn peak_detector(&self) -> &PeakDetector {
        &self.peaks
    }

    pub fn metadata(&self) -> AudioMetadata {
        self.source.metadata()
    }

    pub fn config(&self) -> &WaveformConfig {
        &self.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Release everything; safe to call more than once
    ///
    /// Each step runs even if an earlier one panicked.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("[WAVEFORM] Shutting down");

        shutdown_step("stop stats reporter", || {
            let reporter = self
                .reporter
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(mut reporter) = reporter {
                reporter.stop();
            }
        });
        shutdown_step("log stats", || {
            self.stats.log_stats();
            self.stats.reset();
        });
        // Renderer first, so composites woken by the clear resolve to None
        shutdown_step("stop renderer", || self.renderer.shutdown());
        shutdown_step("clear cache", || self.cache.clear());
        shutdown_step("stop render pool", || {
            self.pool.shutdown(self.config.shutdown_grace());
        });
        shutdown_step("close source", || self.source.close());
    }
}

impl Drop for Waveform {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn shutdown_step(name: &str, step: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(step)).is_err() {
        log::error!("[WAVEFORM] Shutdown step '{}' panicked, continuing", name);
    }
}
