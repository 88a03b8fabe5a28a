//! Segment cache counters
//!
//! Plain relaxed atomics: each counter is independent, and a snapshot taken
//! while renders are running is allowed to be slightly torn.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared between the cache, renderer and stats reporter
#[derive(Debug, Default)]
pub struct CacheStats {
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    updates: AtomicU64,
    evictions: AtomicU64,
    clears: AtomicU64,
    resizes: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub updates: u64,
    pub evictions: u64,
    pub clears: u64,
    pub resizes: u64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// One clear, counting every dropped entry as an eviction
    pub(crate) fn record_clear(&self, items_cleared: usize) {
        self.clears.fetch_add(1, Ordering::Relaxed);
        self.evictions
            .fetch_add(items_cleared as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_resize(&self, old_size: usize, new_size: usize) {
        self.resizes.fetch_add(1, Ordering::Relaxed);
        log::debug!("[CACHE] Resized from {} to {} entries", old_size, new_size);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Fraction of requests served from the cache (0.0 with no requests)
    pub fn hit_rate(&self) -> f64 {
        self.snapshot().hit_rate()
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
            resizes: self.resizes.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter (new audio session)
    pub fn reset(&self) {
        for counter in [
            &self.requests,
            &self.hits,
            &self.misses,
            &self.puts,
            &self.updates,
            &self.evictions,
            &self.clears,
            &self.resizes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn log_stats(&self) {
        log::info!("[CACHE] {}", self.snapshot());
    }
}

impl CacheStatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.requests as f64
        }
    }
}

impl fmt::Display for CacheStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requests, {} hits ({:.1}% hit rate), {} misses, {} puts, {} updates, \
             {} evictions, {} clears, {} resizes",
            self.requests,
            self.hits,
            self.hit_rate() * 100.0,
            self.misses,
            self.puts,
            self.updates,
            self.evictions,
            self.clears,
            self.resizes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats::new();
        assert_eq!(stats.hit_rate(), 0.0);

        for _ in 0..4 {
            stats.record_request();
        }
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert_eq!(stats.hit_rate(), 0.75);
    }

    #[test]
    fn test_clear_counts_evictions() {
        let stats = CacheStats::new();
        stats.record_eviction();
        stats.record_clear(5);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.clears, 1);
        assert_eq!(snapshot.evictions, 6);
    }

    #[test]
    fn test_reset() {
        let stats = CacheStats::new();
        stats.record_request();
        stats.record_put();
        stats.record_update();
        stats.record_resize(10, 20);
        stats.reset();
        assert_eq!(stats.snapshot(), CacheStatsSnapshot::default());
    }

    #[test]
    fn test_display() {
        let snapshot = CacheStatsSnapshot {
            requests: 10,
            hits: 9,
            misses: 1,
            ..Default::default()
        };
        let text = snapshot.to_string();
        assert!(text.starts_with("10 requests, 9 hits (90.0% hit rate), 1 misses"));
    }
}
