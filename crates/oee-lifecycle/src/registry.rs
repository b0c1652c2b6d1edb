//! Interval registry
//!
//! Provides [`IntervalRegistry`], the ledger of every live polling timer. Pollers
//! own their [`TimerHandle`]s; the registry only keeps a clone so that a single
//! [`IntervalRegistry::clear_all_intervals`] call can stop every loop at once.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Unique timer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    /// Allocate the next process-unique id
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    #[inline]
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Capability to stop a running timer
pub trait CancelTimer: Send + Sync {
    /// Stop the timer. Must be idempotent.
    fn cancel(&self);
}

impl CancelTimer for CancellationToken {
    fn cancel(&self) {
        CancellationToken::cancel(self);
    }
}

/// Opaque handle to a repeating timer
#[derive(Clone)]
pub struct TimerHandle {
    id: TimerId,
    cancel: Arc<dyn CancelTimer>,
}

impl TimerHandle {
    /// Wrap a cancel capability under a fresh id
    #[must_use]
    pub fn new(cancel: impl CancelTimer + 'static) -> Self {
        Self {
            id: TimerId::next(),
            cancel: Arc::new(cancel),
        }
    }

    /// Handle backed by a cancellation token
    #[inline]
    #[must_use]
    pub fn from_token(token: CancellationToken) -> Self {
        Self::new(token)
    }

    /// Timer id
    #[inline]
    #[must_use]
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Stop the timer
    #[inline]
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle").field("id", &self.id).finish()
    }
}

#[derive(Debug, Default)]
struct Inner {
    live: HashMap<TimerId, TimerHandle>,
    clearing: bool,
}

/// Process-lifetime ledger of live timers
///
/// The clearing flag is read and written under the same lock as the live set,
/// so a registration can never slip in between the drain and the flag reset.
#[derive(Debug, Default)]
pub struct IntervalRegistry {
    inner: Mutex<Inner>,
}

impl IntervalRegistry {
    /// Create an empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a timer
    ///
    /// Returns `false` and drops the registration while a global clear is
    /// sweeping the set. The caller is expected to cancel the handle itself.
    pub fn register_interval(&self, handle: &TimerHandle) -> bool {
        let mut inner = self.inner.lock();
        if inner.clearing {
            tracing::debug!(timer = %handle.id(), "registration rejected during teardown");
            return false;
        }
        inner.live.insert(handle.id(), handle.clone());
        tracing::trace!(timer = %handle.id(), active = inner.live.len(), "interval registered");
        true
    }

    /// Stop tracking a timer. Unknown ids are ignored.
    pub fn unregister_interval(&self, id: TimerId) -> bool {
        let removed = self.inner.lock().live.remove(&id).is_some();
        if removed {
            tracing::trace!(timer = %id, "interval unregistered");
        }
        removed
    }

    /// Cancel every registered timer and empty the set
    ///
    /// Handles are cancelled outside the lock, so a cancel implementation may
    /// call back into the registry. Returns the number of timers cancelled.
    pub fn clear_all_intervals(&self) -> usize {
        let drained: Vec<TimerHandle> = {
            let mut inner = self.inner.lock();
            if inner.clearing {
                return 0;
            }
            inner.clearing = true;
            inner.live.drain().map(|(_, handle)| handle).collect()
        };

        let _guard = ClearingGuard(&self.inner);
        for handle in &drained {
            handle.cancel();
        }

        tracing::info!(count = drained.len(), "cleared all intervals");
        drained.len()
    }

    /// Number of live timers
    #[inline]
    #[must_use]
    pub fn active_intervals_count(&self) -> usize {
        self.inner.lock().live.len()
    }

    /// Whether a timer is tracked
    #[inline]
    #[must_use]
    pub fn contains(&self, id: TimerId) -> bool {
        self.inner.lock().live.contains_key(&id)
    }

    /// Whether a global clear is in progress
    #[inline]
    #[must_use]
    pub fn is_clearing(&self) -> bool {
        self.inner.lock().clearing
    }
}

/// Resets the clearing flag even if a cancel implementation panics
struct ClearingGuard<'a>(&'a Mutex<Inner>);

impl Drop for ClearingGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().clearing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn register_and_unregister() {
        let registry = IntervalRegistry::new();
        let handle = TimerHandle::from_token(CancellationToken::new());

        assert!(registry.register_interval(&handle));
        assert_eq!(registry.active_intervals_count(), 1);
        assert!(registry.contains(handle.id()));

        assert!(registry.unregister_interval(handle.id()));
        assert_eq!(registry.active_intervals_count(), 0);
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let registry = IntervalRegistry::new();
        let handle = TimerHandle::from_token(CancellationToken::new());
        registry.register_interval(&handle);

        assert!(!registry.unregister_interval(TimerId::next()));
        assert_eq!(registry.active_intervals_count(), 1);
    }

    #[test]
    fn clear_cancels_every_token() {
        let registry = IntervalRegistry::new();
        let tokens: Vec<CancellationToken> = (0..3).map(|_| CancellationToken::new()).collect();
        for token in &tokens {
            registry.register_interval(&TimerHandle::from_token(token.clone()));
        }

        assert_eq!(registry.clear_all_intervals(), 3);
        assert_eq!(registry.active_intervals_count(), 0);
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
        assert!(!registry.is_clearing());
    }

    /// Cancel hook that tries to register a replacement timer mid-sweep
    struct Reregistering {
        registry: Arc<IntervalRegistry>,
        attempted: Arc<AtomicUsize>,
        accepted: Arc<AtomicUsize>,
    }

    impl CancelTimer for Reregistering {
        fn cancel(&self) {
            self.attempted.fetch_add(1, Ordering::SeqCst);
            let replacement = TimerHandle::from_token(CancellationToken::new());
            if self.registry.register_interval(&replacement) {
                self.accepted.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn registration_during_sweep_is_dropped() {
        let registry = Arc::new(IntervalRegistry::new());
        let attempted = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::new(AtomicUsize::new(0));

        registry.register_interval(&TimerHandle::new(Reregistering {
            registry: Arc::clone(&registry),
            attempted: Arc::clone(&attempted),
            accepted: Arc::clone(&accepted),
        }));

        registry.clear_all_intervals();

        assert_eq!(attempted.load(Ordering::SeqCst), 1);
        assert_eq!(accepted.load(Ordering::SeqCst), 0);
        assert_eq!(registry.active_intervals_count(), 0);

        // Registration works again once the sweep finished
        let handle = TimerHandle::from_token(CancellationToken::new());
        assert!(registry.register_interval(&handle));
    }

    #[test]
    fn timer_ids_are_unique() {
        let a = TimerId::next();
        let b = TimerId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("timer-"));
    }
}
