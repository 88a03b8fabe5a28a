//! Shareable asynchronous render results
//!
//! A `RenderHandle` can be stored in the segment cache while its task is still
//! running. Everyone who looks the key up gets a clone of the same handle and
//! observes the same outcome, which is what keeps two viewport requests from
//! rendering one strip twice.
//!
//! Outcomes can be consumed three ways:
//!
//! - blocking: `wait()` / `wait_timeout()`
//! - async: `resolved().await`
//! - continuation: `on_complete(callback)`, used by the compositor so no pool
//!   thread ever blocks on another pool task

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::RenderError;

/// Final value of a handle: an image, an intentional blank (`None`), or an error
pub type RenderOutcome<T> = Result<Option<Arc<T>>, RenderError>;

type Callback<T> = Box<dyn FnOnce(&RenderOutcome<T>) + Send + 'static>;

/// Cooperative cancellation flag shared between a handle and its task
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once cancelled, for `?` at safe points in task loops
    pub fn check(&self) -> Result<(), RenderError> {
        if self.is_cancelled() {
            Err(RenderError::Cancelled)
        } else {
            Ok(())
        }
    }
}

struct State<T> {
    outcome: Option<RenderOutcome<T>>,
    callbacks: Vec<Callback<T>>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
    notify: Notify,
    token: CancelToken,
}

/// Handle to a render result that may still be in flight
pub struct RenderHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for RenderHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for RenderHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.lock().outcome.as_ref() {
            None => "pending",
            Some(Ok(Some(_))) => "ready",
            Some(Ok(None)) => "blank",
            Some(Err(RenderError::Cancelled)) => "cancelled",
            Some(Err(RenderError::Failed(_))) => "failed",
        };
        f.debug_struct("RenderHandle").field("state", &state).finish()
    }
}

impl<T: Send + Sync + 'static> RenderHandle<T> {
    /// A handle whose task has not finished yet
    pub fn pending() -> Self {
        Self::with_token(CancelToken::new())
    }

    /// A pending handle sharing an existing cancellation token
    pub fn with_token(token: CancelToken) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    outcome: None,
                    callbacks: Vec::new(),
                }),
                ready: Condvar::new(),
                notify: Notify::new(),
                token,
            }),
        }
    }

    /// A handle that is already resolved
    pub fn resolved_with(value: Option<T>) -> Self {
        let handle = Self::pending();
        handle.complete(Ok(value.map(Arc::new)));
        handle
    }

    /// Token the producing task should poll
    pub fn token(&self) -> CancelToken {
        self.shared.token.clone()
    }

    /// Resolve the handle. Returns false if it was already resolved.
    pub fn complete(&self, outcome: RenderOutcome<T>) -> bool {
        let callbacks = {
            let mut state = self.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            std::mem::take(&mut state.callbacks)
        };

        self.shared.ready.notify_all();
        self.shared.notify.notify_waiters();

        for callback in callbacks {
            callback(&outcome);
        }
        true
    }

    /// Cancel the task and resolve the handle as cancelled
    ///
    /// Returns false if the handle had already resolved.
    pub fn cancel(&self) -> bool {
        self.shared.token.cancel();
        self.complete(Err(RenderError::Cancelled))
    }

    pub fn is_done(&self) -> bool {
        self.lock().outcome.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.lock().outcome, Some(Err(RenderError::Cancelled)))
    }

    /// Outcome if resolved, without blocking
    pub fn try_outcome(&self) -> Option<RenderOutcome<T>> {
        self.lock().outcome.clone()
    }

    /// Block the calling thread until the handle resolves
    pub fn wait(&self) -> RenderOutcome<T> {
        let mut state = self.lock();
        loop {
            if let Some(outcome) = state.outcome.as_ref() {
                return outcome.clone();
            }
            state = self
                .shared
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block for at most `timeout`; `None` if still pending
    pub fn wait_timeout(&self, timeout: Duration) -> Option<RenderOutcome<T>> {
        let state = self.lock();
        let (state, _) = self
            .shared
            .ready
            .wait_timeout_while(state, timeout, |s| s.outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        state.outcome.clone()
    }

    /// Wait asynchronously for the handle to resolve
    pub async fn resolved(&self) -> RenderOutcome<T> {
        loop {
            // Register before checking so a completion in between is not lost
            let notified = self.shared.notify.notified();
            if let Some(outcome) = self.try_outcome() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Run `callback` once the handle resolves
    ///
    /// Runs immediately on the calling thread if already resolved, otherwise
    /// on whichever thread resolves the handle.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&RenderOutcome<T>) + Send + 'static,
    {
        let outcome = {
            let mut state = self.lock();
            match state.outcome.as_ref() {
                Some(outcome) => outcome.clone(),
                None => {
                    state.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&outcome);
    }

    /// Whether two handles refer to the same in-flight task
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.shared, &b.shared)
    }
}

impl<T> RenderHandle<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_complete_once() {
        let handle: RenderHandle<u32> = RenderHandle::pending();
        assert!(!handle.is_done());
        assert!(handle.complete(Ok(Some(Arc::new(7)))));
        assert!(!handle.complete(Ok(None)));
        assert_eq!(*handle.wait().unwrap().unwrap(), 7);
    }

    #[test]
    fn test_cancel_sets_token_and_outcome() {
        let handle: RenderHandle<u32> = RenderHandle::pending();
        let token = handle.token();
        assert!(handle.cancel());
        assert!(token.is_cancelled());
        assert!(handle.is_cancelled());
        assert_eq!(token.check(), Err(RenderError::Cancelled));

        // Late completion by the task is ignored
        assert!(!handle.complete(Ok(Some(Arc::new(1)))));
        assert_eq!(handle.wait(), Err(RenderError::Cancelled));
    }

    #[test]
    fn test_clones_share_outcome() {
        let handle: RenderHandle<u32> = RenderHandle::pending();
        let clone = handle.clone();
        assert!(RenderHandle::ptr_eq(&handle, &clone));

        let producer = thread::spawn(move || {
            clone.complete(Ok(Some(Arc::new(42))));
        });
        assert_eq!(*handle.wait().unwrap().unwrap(), 42);
        producer.join().unwrap();
    }

    #[test]
    fn test_callbacks_run_once_after_completion() {
        let handle: RenderHandle<u32> = RenderHandle::pending();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        handle.on_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        handle.complete(Ok(None));
        handle.complete(Ok(None));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Registered after completion: runs immediately
        let counter = calls.clone();
        handle.on_complete(move |outcome| {
            assert!(matches!(outcome, Ok(None)));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_wait_timeout_pending() {
        let handle: RenderHandle<u32> = RenderHandle::pending();
        assert!(handle.wait_timeout(Duration::from_millis(10)).is_none());
        handle.cancel();
        assert_eq!(
            handle.wait_timeout(Duration::from_millis(10)),
            Some(Err(RenderError::Cancelled))
        );
    }

    #[tokio::test]
    async fn test_resolved_async() {
        let handle: RenderHandle<u32> = RenderHandle::pending();
        let producer = handle.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.complete(Ok(Some(Arc::new(5))));
        });
        let outcome = handle.resolved().await;
        assert_eq!(*outcome.unwrap().unwrap(), 5);
        worker.join().unwrap();
    }
}
