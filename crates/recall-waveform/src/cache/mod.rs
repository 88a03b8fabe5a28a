//! Bounded segment cache
//!
//! Circular buffer of `SegmentKey → RenderHandle` entries. Handles are stored
//! while still pending so a second request for the same strip joins the
//! running render instead of starting another one. Replacement is strictly
//! round-robin from `head`; there is no recency tracking.
//!
//! All state sits behind one `RwLock`. Lookups take the read lock; `put`,
//! `clear` and viewport changes take the write lock and then call helpers that
//! work on the already locked `CacheState`. Those helpers hand back the
//! handles they dropped, which are cancelled only after the guard is released:
//! cancelling runs completion callbacks, and a callback may well call back
//! into the cache.

mod stats;

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::WaveformConfig;
use crate::handle::RenderHandle;
use crate::image::SegmentImage;
use crate::types::{SegmentKey, ViewportSpec, SEGMENT_WIDTH_PX};

pub use stats::{CacheStats, CacheStatsSnapshot};

/// Handle type stored for each segment
pub type SegmentHandle = RenderHandle<SegmentImage>;

#[derive(Debug, Clone)]
struct CacheEntry {
    key: SegmentKey,
    handle: SegmentHandle,
}

/// Capacity parameters taken from the config
#[derive(Debug, Clone, Copy)]
struct Sizing {
    prefetch_count: usize,
    buffer_factor: f64,
    min_headroom: usize,
}

impl Sizing {
    fn capacity_for(&self, viewport_width_px: u32) -> usize {
        let visible = viewport_width_px.div_ceil(SEGMENT_WIDTH_PX) as usize;
        let needed = visible + 2 * self.prefetch_count;
        let buffered = (needed as f64 * self.buffer_factor) as usize;
        buffered.max(needed + self.min_headroom).max(1)
    }
}

#[derive(Debug, Default)]
struct CacheState {
    /// Empty until `initialize`
    slots: Vec<Option<CacheEntry>>,
    head: usize,
    viewport: Option<ViewportSpec>,
}

impl CacheState {
    fn is_initialized(&self) -> bool {
        !self.slots.is_empty()
    }
}

/// Thread-safe store of segment render handles
#[derive(Debug)]
pub struct SegmentCache {
    state: RwLock<CacheState>,
    stats: Arc<CacheStats>,
    sizing: Sizing,
}

impl SegmentCache {
    pub fn new(stats: Arc<CacheStats>, config: &WaveformConfig) -> Self {
        let config = config.clone().validated();
        Self {
            state: RwLock::new(CacheState::default()),
            stats,
            sizing: Sizing {
                prefetch_count: config.prefetch_count as usize,
                buffer_factor: config.cache_buffer_factor,
                min_headroom: config.cache_min_headroom,
            },
        }
    }

    /// Size the cache for `viewport` and start tracking it
    ///
    /// Calling again drops (and cancels) whatever the cache held.
    pub fn initialize(&self, viewport: &ViewportSpec) {
        let mut state = self.write();
        let dropped = Self::take_all(&mut state);
        self.initialize_locked(&mut state, viewport);
        drop(state);
        cancel_handles(dropped);
    }

    /// Look up a segment, recording a request and a hit or miss
    pub fn get(&self, key: &SegmentKey) -> Option<SegmentHandle> {
        self.get_with_stats(key, true)
    }

    /// Look up a segment; prefetch passes `record_stats = false` so its
    /// probing does not distort the hit rate
    pub fn get_with_stats(&self, key: &SegmentKey, record_stats: bool) -> Option<SegmentHandle> {
        let state = self.read();
        if record_stats {
            self.stats.record_request();
        }

        if !state.is_initialized() {
            if record_stats {
                self.stats.record_miss();
                log::warn!("[CACHE] Not initialized, miss for {}", key);
            }
            return None;
        }

        let found = state
            .slots
            .iter()
            .flatten()
            .find(|entry| entry.key == *key)
            .map(|entry| entry.handle.clone());

        if record_stats {
            match found {
                Some(_) => {
                    self.stats.record_hit();
                    log::trace!("[CACHE] HIT {}", key);
                }
                None => {
                    self.stats.record_miss();
                    log::debug!("[CACHE] MISS {}", key);
                }
            }
        }
        found
    }

    /// Store a handle (possibly still pending)
    ///
    /// An existing entry for the same key is replaced in place. Otherwise the
    /// entry goes to `head`, evicting and cancelling whatever lived there.
    pub fn put(&self, key: SegmentKey, handle: SegmentHandle) {
        let mut state = self.write();
        if !state.is_initialized() {
            log::warn!("[CACHE] Not initialized, cannot put {}", key);
            return;
        }

        if let Some(entry) = state
            .slots
            .iter_mut()
            .flatten()
            .find(|entry| entry.key == key)
        {
            entry.handle = handle;
            self.stats.record_update();
            return;
        }

        let evicted = self.insert_at_head(&mut state, key, handle);
        drop(state);
        cancel_handles(evicted);
    }

    /// Look up `key`, storing the handle from `make` on a miss
    ///
    /// Lookup and insert happen under one write lock, so concurrent requests
    /// for the same strip always end up sharing one handle. Returns the handle
    /// and whether it was newly inserted (the caller then starts the render).
    /// Stats are recorded as a `get` followed by a `put` would record them.
    pub fn get_or_put<F>(
        &self,
        key: SegmentKey,
        record_stats: bool,
        make: F,
    ) -> Option<(SegmentHandle, bool)>
    where
        F: FnOnce() -> SegmentHandle,
    {
        let mut state = self.write();
        if record_stats {
            self.stats.record_request();
        }
        if !state.is_initialized() {
            if record_stats {
                self.stats.record_miss();
            }
            log::warn!("[CACHE] Not initialized, cannot store {}", key);
            return None;
        }

        if let Some(entry) = state.slots.iter().flatten().find(|entry| entry.key == key) {
            if record_stats {
                self.stats.record_hit();
                log::trace!("[CACHE] HIT {}", key);
            }
            return Some((entry.handle.clone(), false));
        }

        if record_stats {
            self.stats.record_miss();
            log::debug!("[CACHE] MISS {}", key);
        }
        let handle = make();
        let evicted = self.insert_at_head(&mut state, key, handle.clone());
        drop(state);
        cancel_handles(evicted);
        Some((handle, true))
    }

    /// Cancel and drop every entry
    pub fn clear(&self) {
        let mut state = self.write();
        let dropped = self.clear_locked(&mut state);
        drop(state);
        cancel_handles(dropped);
    }

    /// React to a new viewport
    ///
    /// A resolution or height change makes every entry useless: clear and
    /// re-initialize. A width change only resizes. Scrolling alone keeps
    /// everything.
    pub fn update_viewport(&self, viewport: &ViewportSpec) {
        let mut state = self.write();
        let Some(current) = state.viewport else {
            self.initialize_locked(&mut state, viewport);
            return;
        };

        let mut dropped = Vec::new();
        if !current.same_resolution(viewport) {
            log::debug!(
                "[CACHE] Clearing on viewport change: pps {} -> {}, height {} -> {}",
                current.pixels_per_second,
                viewport.pixels_per_second,
                current.viewport_height_px,
                viewport.viewport_height_px
            );
            dropped = self.clear_locked(&mut state);
            self.initialize_locked(&mut state, viewport);
        } else {
            if current.viewport_width_px != viewport.viewport_width_px {
                log::debug!(
                    "[CACHE] Resizing on width change: {} -> {}",
                    current.viewport_width_px,
                    viewport.viewport_width_px
                );
                dropped = self.resize_locked(&mut state, viewport.viewport_width_px);
            }
            state.viewport = Some(*viewport);
        }
        drop(state);
        cancel_handles(dropped);
    }

    /// Slot count (0 before initialization)
    pub fn capacity(&self) -> usize {
        self.read().slots.len()
    }

    /// Occupied slots
    pub fn len(&self) -> usize {
        self.read().slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Store at `head` and advance it; returns the evicted handle, if any
    fn insert_at_head(
        &self,
        state: &mut CacheState,
        key: SegmentKey,
        handle: SegmentHandle,
    ) -> Option<SegmentHandle> {
        let head = state.head;
        let evicted = state.slots[head].take().map(|evicted| {
            log::debug!(
                "[CACHE] Evicting segment {} for segment {}",
                evicted.key.segment_index,
                key.segment_index
            );
            self.stats.record_eviction();
            evicted.handle
        });
        state.slots[head] = Some(CacheEntry { key, handle });
        log::trace!(
            "[CACHE] Put segment {} at slot {} of {}",
            key.segment_index,
            head,
            state.slots.len()
        );
        state.head = (head + 1) % state.slots.len();
        self.stats.record_put();
        evicted
    }

    fn initialize_locked(&self, state: &mut CacheState, viewport: &ViewportSpec) {
        let capacity = self.sizing.capacity_for(viewport.viewport_width_px);
        let visible = viewport.visible_segment_count();
        let prefetch = 2 * self.sizing.prefetch_count;

        state.slots = vec![None; capacity];
        state.head = 0;
        state.viewport = Some(*viewport);

        log::debug!(
            "[CACHE] Initialized with {} slots (visible: {}, prefetch: {}, buffer: {})",
            capacity,
            visible,
            prefetch,
            capacity.saturating_sub(visible + prefetch)
        );
    }

    fn clear_locked(&self, state: &mut CacheState) -> Vec<SegmentHandle> {
        let dropped = Self::take_all(state);
        state.head = 0;
        self.stats.record_clear(dropped.len());
        dropped
    }

    fn take_all(state: &mut CacheState) -> Vec<SegmentHandle> {
        state
            .slots
            .iter_mut()
            .filter_map(|slot| slot.take())
            .map(|entry| entry.handle)
            .collect()
    }

    /// Keep entries in slot order up to the new size; returns the overflow
    fn resize_locked(&self, state: &mut CacheState, viewport_width_px: u32) -> Vec<SegmentHandle> {
        let old_size = state.slots.len();
        let new_size = self.sizing.capacity_for(viewport_width_px);
        if new_size == old_size {
            return Vec::new();
        }

        let mut slots: Vec<Option<CacheEntry>> = Vec::with_capacity(new_size);
        let mut overflow = Vec::new();
        for entry in state.slots.drain(..).flatten() {
            if slots.len() < new_size {
                slots.push(Some(entry));
            } else {
                overflow.push(entry.handle);
            }
        }
        let copied = slots.len();
        slots.resize(new_size, None);

        state.slots = slots;
        state.head = copied % new_size;
        self.stats.record_resize(old_size, new_size);
        overflow
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Cancel handles dropped from the cache; call with no cache lock held
fn cancel_handles(handles: impl IntoIterator<Item = SegmentHandle>) {
    for handle in handles {
        handle.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn cache() -> SegmentCache {
        SegmentCache::new(Arc::new(CacheStats::new()), &WaveformConfig::default())
    }

    fn viewport(width: u32, height: u32, pps: u32) -> ViewportSpec {
        ViewportSpec::new(0.0, width as f64 / pps as f64, width, height, pps).unwrap()
    }

    fn key(index: i64) -> SegmentKey {
        SegmentKey::new(index, 200, 200)
    }

    #[test]
    fn test_capacity_formula() {
        let cache = cache();
        // 1000px: 5 visible + 20 prefetch = 25; max(37, 35) = 37
        cache.initialize(&viewport(1000, 200, 200));
        assert_eq!(cache.capacity(), 37);

        // 200px: 1 + 20 = 21; max(31, 31) = 31
        cache.initialize(&viewport(200, 200, 200));
        assert_eq!(cache.capacity(), 31);
    }

    #[test]
    fn test_invalid_sizing_falls_back_to_defaults() {
        let config = WaveformConfig {
            cache_buffer_factor: f64::NAN,
            ..Default::default()
        };
        let cache = SegmentCache::new(Arc::new(CacheStats::new()), &config);
        cache.initialize(&viewport(1000, 200, 200));
        assert_eq!(cache.capacity(), 37);
    }

    #[test]
    fn test_uninitialized_is_soft_fail() {
        let cache = cache();
        assert!(cache.get(&key(0)).is_none());
        cache.put(key(0), RenderHandle::pending());
        assert_eq!(cache.len(), 0);

        let stats = cache.stats().snapshot();
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.puts, 0);
    }

    #[test]
    fn test_put_get_and_stats() {
        let cache = cache();
        cache.initialize(&viewport(1000, 200, 200));

        let handle = RenderHandle::pending();
        cache.put(key(3), handle.clone());
        let found = cache.get(&key(3)).unwrap();
        assert!(RenderHandle::ptr_eq(&found, &handle));
        assert!(cache.get(&key(4)).is_none());
        assert!(cache.get_with_stats(&key(3), false).is_some());

        let stats = cache.stats().snapshot();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.puts, 1);
    }

    #[test]
    fn test_put_same_key_updates_in_place() {
        let cache = cache();
        cache.initialize(&viewport(1000, 200, 200));

        let first = RenderHandle::pending();
        let second = RenderHandle::pending();
        cache.put(key(1), first.clone());
        cache.put(key(1), second.clone());

        assert_eq!(cache.len(), 1);
        assert!(!first.is_done());
        assert!(RenderHandle::ptr_eq(&cache.get(&key(1)).unwrap(), &second));
        let stats = cache.stats().snapshot();
        assert_eq!((stats.puts, stats.updates), (1, 1));
    }

    #[test]
    fn test_get_or_put_shares_handle() {
        let cache = cache();
        cache.initialize(&viewport(1000, 200, 200));

        let (first, inserted) = cache.get_or_put(key(2), true, RenderHandle::pending).unwrap();
        assert!(inserted);
        let (second, inserted) = cache
            .get_or_put(key(2), true, || panic!("must not build a second handle"))
            .unwrap();
        assert!(!inserted);
        assert!(RenderHandle::ptr_eq(&first, &second));

        let stats = cache.stats().snapshot();
        assert_eq!((stats.requests, stats.hits, stats.misses, stats.puts), (2, 1, 1, 1));

        // Unrecorded probes leave the counters alone
        cache.get_or_put(key(3), false, RenderHandle::pending).unwrap();
        assert_eq!(cache.stats().snapshot().requests, 2);
        assert_eq!(cache.stats().snapshot().puts, 2);
    }

    #[test]
    fn test_circular_eviction_cancels() {
        let cache = cache();
        cache.initialize(&viewport(1000, 200, 200));
        let capacity = cache.capacity();

        let first = RenderHandle::pending();
        cache.put(key(0), first.clone());
        for i in 1..capacity as i64 {
            cache.put(key(i), RenderHandle::pending());
        }
        assert_eq!(cache.len(), capacity);
        assert!(!first.is_done());

        // Wraps around to slot 0
        cache.put(key(capacity as i64), RenderHandle::pending());
        assert!(first.is_cancelled());
        assert!(cache.get(&key(0)).is_none());
        assert!(cache.get(&key(1)).is_some());
        assert_eq!(cache.len(), capacity);
        assert_eq!(cache.stats().snapshot().evictions, 1);
    }

    #[test]
    fn test_clear_cancels_everything() {
        let cache = cache();
        cache.initialize(&viewport(1000, 200, 200));
        let handles: Vec<SegmentHandle> = (0..5).map(|_| RenderHandle::pending()).collect();
        for (i, handle) in handles.iter().enumerate() {
            cache.put(key(i as i64), handle.clone());
        }

        cache.clear();
        assert!(cache.is_empty());
        assert!(handles.iter().all(|h| h.is_cancelled()));
        let stats = cache.stats().snapshot();
        assert_eq!((stats.clears, stats.evictions), (1, 5));
    }

    #[test]
    fn test_cancel_callbacks_may_reenter_cache() {
        let cache = Arc::new(cache());
        cache.initialize(&viewport(1000, 200, 200));
        let capacity = cache.capacity() as i64;
        let (tx, rx) = mpsc::channel();

        // Evicted at the next wrap-around
        let evicted = RenderHandle::pending();
        let inner = Arc::clone(&cache);
        let evicted_tx = tx.clone();
        evicted.on_complete(move |_| {
            evicted_tx.send(inner.get(&key(1)).is_some()).unwrap();
        });
        cache.put(key(0), evicted);
        for i in 1..=capacity {
            cache.put(key(i), RenderHandle::pending());
        }
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));

        // Cleared: the callback stores a fresh entry while the clear returns
        let cleared = RenderHandle::pending();
        let inner = Arc::clone(&cache);
        cleared.on_complete(move |_| {
            inner.put(key(500), RenderHandle::pending());
            tx.send(inner.len() == 1).unwrap();
        });
        cache.put(key(400), cleared);
        cache.clear();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));
        assert!(cache.get(&key(500)).is_some());
    }

    #[test]
    fn test_zoom_change_clears() {
        let cache = cache();
        cache.update_viewport(&viewport(1000, 200, 200));
        let handle = RenderHandle::pending();
        cache.put(key(0), handle.clone());

        cache.update_viewport(&viewport(1000, 200, 300));
        assert!(handle.is_cancelled());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().snapshot().clears, 1);
    }

    #[test]
    fn test_height_change_clears() {
        let cache = cache();
        cache.update_viewport(&viewport(1000, 200, 200));
        cache.put(key(0), RenderHandle::pending());

        cache.update_viewport(&viewport(1000, 250, 200));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_scroll_keeps_entries() {
        let cache = cache();
        cache.update_viewport(&viewport(1000, 200, 200));
        cache.put(key(0), RenderHandle::pending());

        let scrolled = ViewportSpec::new(3.0, 8.0, 1000, 200, 200).unwrap();
        cache.update_viewport(&scrolled);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().snapshot().resizes, 0);
    }

    #[test]
    fn test_width_change_resizes_in_place() {
        let cache = cache();
        cache.update_viewport(&viewport(1000, 200, 200));
        for i in 0..10 {
            cache.put(key(i), RenderHandle::pending());
        }

        // 2000px: 10 + 20 = 30; max(45, 40) = 45
        cache.update_viewport(&viewport(2000, 200, 200));
        assert_eq!(cache.capacity(), 45);
        assert_eq!(cache.len(), 10);
        assert!((0..10).all(|i| cache.get_with_stats(&key(i), false).is_some()));
        assert_eq!(cache.stats().snapshot().resizes, 1);

        // Next put lands right after the copied entries
        cache.put(key(100), RenderHandle::pending());
        assert_eq!(cache.len(), 11);
    }

    #[test]
    fn test_shrink_cancels_overflow() {
        let cache = cache();
        cache.update_viewport(&viewport(4000, 200, 200));
        // 20 + 20 = 40; max(60, 50) = 60
        assert_eq!(cache.capacity(), 60);

        let handles: Vec<SegmentHandle> = (0..40).map(|_| RenderHandle::pending()).collect();
        for (i, handle) in handles.iter().enumerate() {
            cache.put(key(i as i64), handle.clone());
        }

        cache.update_viewport(&viewport(200, 200, 200));
        assert_eq!(cache.capacity(), 31);
        assert_eq!(cache.len(), 31);
        // Slot order is preserved: the first 31 survive, the rest are cancelled
        assert!(!handles[30].is_done());
        assert!(handles[31..].iter().all(|h| h.is_cancelled()));

        // head = 31 % 31 = 0, so the oldest entry is evicted next
        cache.put(key(1000), RenderHandle::pending());
        assert!(handles[0].is_cancelled());
    }
}
