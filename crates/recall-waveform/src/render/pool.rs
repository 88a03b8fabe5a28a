//! Priority-ordered render worker pool
//!
//! A fixed rayon pool plus a shared priority queue. Every submission pushes
//! its job onto the queue and spawns one rayon task; that task pops whatever
//! is most urgent *when it starts*, so visible strips overtake prefetch work
//! that was queued earlier.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{WaveformError, WaveformResult};

/// Scheduling tier of a render job, most urgent last
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Prefetch against the direction of travel
    PrefetchOppositeDirection,
    /// Prefetch ahead of the viewport
    PrefetchScrollDirection,
    /// On screen right now
    Visible,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueuedJob {
    priority: Priority,
    seq: u64,
    run: Job,
    /// Called instead of `run` when the job is dropped at shutdown
    abandon: Job,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    /// Max-heap order: higher priority first, then lower sequence (FIFO)
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Counters {
    /// Queued plus running
    in_flight: usize,
}

struct PoolShared {
    queue: Mutex<BinaryHeap<QueuedJob>>,
    counters: Mutex<Counters>,
    idle: Condvar,
    next_seq: AtomicU64,
    accepting: AtomicBool,
}

impl PoolShared {
    fn queue(&self) -> MutexGuard<'_, BinaryHeap<QueuedJob>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish_one(&self) {
        let mut counters = self.counters();
        counters.in_flight = counters.in_flight.saturating_sub(1);
        if counters.in_flight == 0 {
            self.idle.notify_all();
        }
    }

    /// Body of every spawned rayon task
    fn run_next(&self) {
        let Some(job) = self.queue().pop() else {
            // Drained by a forced shutdown
            return;
        };

        if catch_unwind(AssertUnwindSafe(job.run)).is_err() {
            log::error!("[POOL] Render job panicked ({:?})", job.priority);
        }
        self.finish_one();
    }
}

/// Bounded worker pool for segment renders, prefetch and peak warm-up
pub struct RenderPool {
    pool: rayon::ThreadPool,
    shared: Arc<PoolShared>,
    threads: usize,
}

impl std::fmt::Debug for RenderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPool")
            .field("threads", &self.threads)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl RenderPool {
    /// Spawn `threads` workers named `waveform-render-{i}`
    pub fn new(threads: usize) -> WaveformResult<Self> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("waveform-render-{}", i))
            .build()
            .map_err(|e| WaveformError::Pool(e.to_string()))?;

        log::debug!("[POOL] Started {} render threads", threads);
        Ok(Self {
            pool,
            shared: Arc::new(PoolShared {
                queue: Mutex::new(BinaryHeap::new()),
                counters: Mutex::new(Counters::default()),
                idle: Condvar::new(),
                next_seq: AtomicU64::new(0),
                accepting: AtomicBool::new(true),
            }),
            threads,
        })
    }

    pub fn thread_count(&self) -> usize {
        self.threads
    }

    /// Queue a job
    ///
    /// `abandon` runs instead of `run` if the job never gets to execute:
    /// immediately when the pool is shutting down, or when a forced shutdown
    /// drops it from the queue. Returns whether the job was queued.
    pub fn submit<R, A>(&self, priority: Priority, run: R, abandon: A) -> bool
    where
        R: FnOnce() + Send + 'static,
        A: FnOnce() + Send + 'static,
    {
        if !self.shared.accepting.load(Ordering::Acquire) {
            log::trace!("[POOL] Rejecting {:?} job after shutdown", priority);
            abandon();
            return false;
        }

        self.shared.counters().in_flight += 1;
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        self.shared.queue().push(QueuedJob {
            priority,
            seq,
            run: Box::new(run),
            abandon: Box::new(abandon),
        });

        let shared = Arc::clone(&self.shared);
        self.pool.spawn(move || shared.run_next());
        true
    }

    /// Jobs queued or running
    pub fn in_flight(&self) -> usize {
        self.shared.counters().in_flight
    }

    /// Jobs waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.queue().len()
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting work and wait up to `grace` for the queue to drain
    ///
    /// On timeout the remaining queued jobs are dropped and abandoned.
    /// Running jobs are left to notice their cancellation tokens. Returns
    /// true if everything finished within the grace period.
    pub fn shutdown(&self, grace: Duration) -> bool {
        self.shared.accepting.store(false, Ordering::Release);

        let deadline = Instant::now() + grace;
        let mut counters = self.shared.counters();
        while counters.in_flight > 0 {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            counters = self
                .shared
                .idle
                .wait_timeout(counters, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        let remaining = counters.in_flight;
        drop(counters);

        if remaining == 0 {
            log::debug!("[POOL] Shut down cleanly");
            return true;
        }

        let dropped: Vec<QueuedJob> = self.shared.queue().drain().collect();
        log::warn!(
            "[POOL] Forced shutdown after {:?}: {} queued jobs dropped, {} still running",
            grace,
            dropped.len(),
            remaining.saturating_sub(dropped.len())
        );
        for job in dropped {
            (job.abandon)();
            self.shared.finish_one();
        }
        false
    }
}
