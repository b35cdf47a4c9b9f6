//! Completion token for asynchronous export operations.
//!
//! An [`ExportResult`] starts pending and is resolved exactly once, to success
//! or to a failure carrying an [`ExportError`]. Every clone observes the same
//! resolution. Callers can block on it ([`ExportResult::join`]), await it
//! ([`ExportResult::wait`]), register a callback
//! ([`ExportResult::when_complete`]) or combine several into one
//! ([`ExportResult::of_all`]).
//!
//! # Double resolution
//!
//! Resolving an already-resolved result is a programming error. Debug builds
//! panic; release builds ignore the second resolution and log a warning.
//! `succeed`/`fail` report whether the call performed the transition.
//!
//! # Blocking
//!
//! `join` parks the calling OS thread. Never call it on a Tokio worker whose
//! progress the resolution depends on (for example inside a current-thread
//! runtime that also drives the export loop); use `wait().await` there.

use crate::error::ExportError;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::warn;

/// Terminal state of an [`ExportResult`].
pub type Outcome = Result<(), ExportError>;

type Callback = Box<dyn FnOnce(&Outcome) + Send>;

struct State {
    outcome: Option<Outcome>,
    callbacks: Vec<Callback>,
}

struct Inner {
    state: Mutex<State>,
    /// Wakes threads blocked in `join`.
    cond: Condvar,
    /// Wakes tasks awaiting `wait`.
    notify: Notify,
}

/// Future-like completion token for one export, flush or shutdown.
#[derive(Clone)]
pub struct ExportResult {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking callback must not wedge every other waiter.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ExportResult {
    /// Creates an unresolved result.
    pub fn pending() -> Self {
        Self::with_outcome(None)
    }

    /// Creates a result already resolved to success.
    pub fn success() -> Self {
        Self::with_outcome(Some(Ok(())))
    }

    /// Creates a result already resolved to failure.
    pub fn failure(error: ExportError) -> Self {
        Self::with_outcome(Some(Err(error)))
    }

    fn with_outcome(outcome: Option<Outcome>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    outcome,
                    callbacks: Vec::new(),
                }),
                cond: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Resolves a pending result to success.
    pub fn succeed(&self) -> bool {
        self.resolve(Ok(()))
    }

    /// Resolves a pending result to failure.
    pub fn fail(&self, error: ExportError) -> bool {
        self.resolve(Err(error))
    }

    /// Resolves a pending result with `outcome`.
    ///
    /// Returns `false` (and panics in debug builds) if already resolved.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        let callbacks = {
            let mut state = lock(&self.inner.state);
            if let Some(existing) = &state.outcome {
                debug_assert!(
                    false,
                    "ExportResult resolved twice: already {:?}, attempted {:?}",
                    existing, outcome
                );
                warn!(existing = ?existing, attempted = ?outcome, "ignoring second resolution of ExportResult");
                return false;
            }
            state.outcome = Some(outcome.clone());
            std::mem::take(&mut state.callbacks)
        };

        self.inner.cond.notify_all();
        self.inner.notify.notify_waiters();

        for callback in callbacks {
            callback(&outcome);
        }
        true
    }

    /// Returns the outcome if resolved.
    pub fn outcome(&self) -> Option<Outcome> {
        lock(&self.inner.state).outcome.clone()
    }

    /// Returns `true` once resolved, either way.
    pub fn is_done(&self) -> bool {
        lock(&self.inner.state).outcome.is_some()
    }

    /// Returns `true` if resolved to success.
    pub fn is_success(&self) -> bool {
        matches!(lock(&self.inner.state).outcome, Some(Ok(())))
    }

    /// Blocks the calling thread until resolved or `timeout` elapses.
    ///
    /// Returns whether the result resolved in time.
    pub fn join(&self, timeout: Duration) -> bool {
        let state = lock(&self.inner.state);
        let (state, _timed_out) = self
            .inner
            .cond
            .wait_timeout_while(state, timeout, |s| s.outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        state.outcome.is_some()
    }

    /// Waits asynchronously for the outcome.
    pub async fn wait(&self) -> Outcome {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a resolution in between is not missed.
            notified.as_mut().enable();

            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Waits asynchronously for at most `timeout`. `None` means still pending.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }

    /// Runs `callback` once resolved; immediately if already resolved.
    ///
    /// Callbacks run on the thread that resolves the result and must not block.
    pub fn when_complete<F>(&self, callback: F)
    where
        F: FnOnce(&Outcome) + Send + 'static,
    {
        let outcome = {
            let mut state = lock(&self.inner.state);
            match &state.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    state.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&outcome);
    }

    /// Combines `results` into one.
    ///
    /// The composite resolves after every child has resolved: success if all
    /// succeeded, otherwise the first failure observed. Waiting for all
    /// children (rather than failing fast) keeps a caller from tearing down
    /// resources that an in-flight child still uses. An empty set is success.
    pub fn of_all<I>(results: I) -> Self
    where
        I: IntoIterator<Item = ExportResult>,
    {
        let children: Vec<ExportResult> = results.into_iter().collect();
        if children.is_empty() {
            return Self::success();
        }

        let composite = Self::pending();
        let remaining = Arc::new(AtomicUsize::new(children.len()));
        let first_failure: Arc<Mutex<Option<ExportError>>> = Arc::new(Mutex::new(None));

        for child in &children {
            let composite = composite.clone();
            let remaining = Arc::clone(&remaining);
            let first_failure = Arc::clone(&first_failure);

            child.when_complete(move |outcome| {
                if let Err(e) = outcome {
                    lock(&first_failure).get_or_insert_with(|| e.clone());
                }
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let failure = lock(&first_failure).take();
                    composite.resolve(failure.map_or(Ok(()), Err));
                }
            });
        }

        composite
    }
}

impl Default for ExportResult {
    fn default() -> Self {
        Self::pending()
    }
}

impl fmt::Debug for ExportResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome() {
            None => f.write_str("ExportResult(Pending)"),
            Some(Ok(())) => f.write_str("ExportResult(Success)"),
            Some(Err(e)) => write!(f, "ExportResult(Failure({}))", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_resolves_once() {
        let result = ExportResult::pending();
        assert!(!result.is_done());

        assert!(result.succeed());
        assert!(result.is_done());
        assert!(result.is_success());
        assert_eq!(result.outcome(), Some(Ok(())));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "resolved twice")]
    fn test_double_resolution_panics_in_debug() {
        let result = ExportResult::pending();
        result.succeed();
        result.fail(ExportError::Timeout);
    }

    #[test]
    fn test_clones_share_state() {
        let result = ExportResult::pending();
        let clone = result.clone();
        clone.fail(ExportError::Shutdown);
        assert_eq!(result.outcome(), Some(Err(ExportError::Shutdown)));
    }

    #[test]
    fn test_join_times_out_when_pending() {
        let result = ExportResult::pending();
        assert!(!result.join(Duration::from_millis(20)));
    }

    #[test]
    fn test_join_wakes_on_resolution_from_other_thread() {
        let result = ExportResult::pending();
        let resolver = result.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            resolver.succeed();
        });

        assert!(result.join(Duration::from_secs(5)));
        assert!(result.is_success());
        handle.join().unwrap();
    }

    #[test]
    fn test_when_complete_runs_immediately_if_resolved() {
        let result = ExportResult::failure(ExportError::Timeout);
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        result.when_complete(move |o| *seen_clone.lock().unwrap() = Some(o.clone()));
        assert_eq!(*seen.lock().unwrap(), Some(Err(ExportError::Timeout)));
    }

    #[test]
    fn test_of_all_empty_is_success() {
        assert!(ExportResult::of_all(Vec::new()).is_success());
    }

    #[test]
    fn test_of_all_waits_for_every_child() {
        let a = ExportResult::pending();
        let b = ExportResult::pending();
        let all = ExportResult::of_all([a.clone(), b.clone()]);

        a.fail(ExportError::Transport("refused".into()));
        // Failure observed, but b is still in flight
        assert!(!all.is_done());

        b.succeed();
        assert_eq!(
            all.outcome(),
            Some(Err(ExportError::Transport("refused".into())))
        );
    }

    #[test]
    fn test_of_all_success_when_all_succeed() {
        let children: Vec<_> = (0..5).map(|_| ExportResult::pending()).collect();
        let all = ExportResult::of_all(children.clone());
        for child in &children {
            assert!(!all.is_done());
            child.succeed();
        }
        assert!(all.is_success());
    }

    #[test]
    fn test_of_all_with_already_resolved_children() {
        let all = ExportResult::of_all([ExportResult::success(), ExportResult::success()]);
        assert!(all.is_success());
    }

    #[tokio::test]
    async fn test_wait_async() {
        let result = ExportResult::pending();
        let resolver = result.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            resolver.fail(ExportError::Timeout);
        });

        assert_eq!(result.wait().await, Err(ExportError::Timeout));
    }

    #[tokio::test]
    async fn test_wait_timeout_returns_none_when_pending() {
        let result = ExportResult::pending();
        assert_eq!(result.wait_timeout(Duration::from_millis(10)).await, None);
    }
}
