//! Auth-failure broadcaster
//!
//! Decouples "something noticed the session is no longer authenticated" from
//! everyone who has to react to it. Teardown always stops polling first so that
//! no tick can repopulate state while the callbacks are tearing it down.

use crate::error::LogoutCallbackError;
use crate::registry::IntervalRegistry;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Zero-argument teardown callback
pub type LogoutCallback = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Registration id for a logout callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackId(u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of one [`AuthFailureBroadcaster::execute_logout`] run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogoutReport {
    /// Timers cancelled before callbacks ran
    pub intervals_cleared: usize,
    /// Callbacks that completed successfully
    pub callbacks_run: usize,
    /// Callbacks that failed or panicked
    pub failures: Vec<LogoutCallbackError>,
    /// True when the call was ignored because a logout was already running
    pub skipped: bool,
}

/// Set of teardown callbacks fired on authentication invalidation
pub struct AuthFailureBroadcaster {
    registry: Arc<IntervalRegistry>,
    callbacks: Mutex<IndexMap<CallbackId, LogoutCallback>>,
    next_id: AtomicU64,
    running: AtomicBool,
}

impl AuthFailureBroadcaster {
    /// Create a broadcaster that tears down `registry` before running callbacks
    #[must_use]
    pub fn new(registry: Arc<IntervalRegistry>) -> Self {
        Self {
            registry,
            callbacks: Mutex::new(IndexMap::new()),
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
        }
    }

    /// Registry cleared on logout
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<IntervalRegistry> {
        &self.registry
    }

    /// Register a callback; it runs in registration order
    pub fn register_logout_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.lock().insert(id, Arc::new(callback));
        id
    }

    /// Remove a callback. Unknown ids are ignored.
    pub fn unregister_logout_callback(&self, id: CallbackId) -> bool {
        self.callbacks.lock().shift_remove(&id).is_some()
    }

    /// Number of registered callbacks
    #[inline]
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Stop all polling, run every callback, then forget them
    ///
    /// A callback that errors or panics is logged and recorded in the report;
    /// the others still run. A nested call made from inside a callback is
    /// skipped.
    pub fn execute_logout(&self) -> LogoutReport {
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::debug!("logout already in progress");
            return LogoutReport {
                skipped: true,
                ..LogoutReport::default()
            };
        }

        let intervals_cleared = self.registry.clear_all_intervals();

        let snapshot: Vec<(CallbackId, LogoutCallback)> = self
            .callbacks
            .lock()
            .iter()
            .map(|(id, callback)| (*id, Arc::clone(callback)))
            .collect();

        let mut report = LogoutReport {
            intervals_cleared,
            ..LogoutReport::default()
        };

        for (id, callback) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| callback())) {
                Ok(Ok(())) => report.callbacks_run += 1,
                Ok(Err(e)) => {
                    tracing::error!(callback = %id, "logout callback failed: {:#}", e);
                    report.failures.push(LogoutCallbackError::Failed {
                        id,
                        message: format!("{e:#}"),
                    });
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(callback = %id, "logout callback panicked: {}", message);
                    report
                        .failures
                        .push(LogoutCallbackError::Panicked { id, message });
                }
            }
        }

        self.callbacks.lock().clear();
        self.running.store(false, Ordering::Release);

        tracing::info!(
            intervals = report.intervals_cleared,
            callbacks = report.callbacks_run,
            failures = report.failures.len(),
            "logout executed"
        );
        report
    }
}

impl fmt::Debug for AuthFailureBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthFailureBroadcaster")
            .field("registry", &self.registry)
            .field("callbacks", &self.callback_count())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TimerHandle;
    use std::sync::atomic::AtomicUsize;
    use tokio_util::sync::CancellationToken;

    fn broadcaster() -> AuthFailureBroadcaster {
        AuthFailureBroadcaster::new(Arc::new(IntervalRegistry::new()))
    }

    #[test]
    fn register_and_unregister_callbacks() {
        let b = broadcaster();
        let id = b.register_logout_callback(|| Ok(()));
        assert_eq!(b.callback_count(), 1);

        assert!(b.unregister_logout_callback(id));
        assert!(!b.unregister_logout_callback(id));
        assert_eq!(b.callback_count(), 0);
    }

    #[test]
    fn intervals_are_cleared_before_callbacks_run() {
        let b = Arc::new(broadcaster());
        let token = CancellationToken::new();
        b.registry()
            .register_interval(&TimerHandle::from_token(token.clone()));

        let observed = Arc::new(Mutex::new(None));
        let registry = Arc::clone(b.registry());
        let seen = Arc::clone(&observed);
        let probe = token.clone();
        b.register_logout_callback(move || {
            *seen.lock() = Some((registry.active_intervals_count(), probe.is_cancelled()));
            Ok(())
        });

        let report = b.execute_logout();

        assert_eq!(report.intervals_cleared, 1);
        assert_eq!(*observed.lock(), Some((0, true)));
    }

    #[test]
    fn failing_callbacks_do_not_block_others() {
        let b = broadcaster();
        let ran = Arc::new(AtomicUsize::new(0));

        let r1 = Arc::clone(&ran);
        b.register_logout_callback(move || {
            r1.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        b.register_logout_callback(|| anyhow::bail!("store reset failed"));
        b.register_logout_callback(|| panic!("boom"));
        let r2 = Arc::clone(&ran);
        b.register_logout_callback(move || {
            r2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let report = b.execute_logout();

        assert_eq!(ran.load(Ordering::SeqCst), 2);
        assert_eq!(report.callbacks_run, 2);
        assert_eq!(report.failures.len(), 2);
        assert!(matches!(
            report.failures[0],
            LogoutCallbackError::Failed { .. }
        ));
        assert!(matches!(
            &report.failures[1],
            LogoutCallbackError::Panicked { message, .. } if message == "boom"
        ));
    }

    #[test]
    fn callbacks_run_in_registration_order_and_are_cleared() {
        let b = broadcaster();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            b.register_logout_callback(move || {
                order.lock().push(i);
                Ok(())
            });
        }

        b.execute_logout();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(b.callback_count(), 0);

        // Second logout has nothing left to run
        let report = b.execute_logout();
        assert_eq!(report.callbacks_run, 0);
        assert_eq!(order.lock().len(), 3);
    }

    #[test]
    fn nested_logout_is_skipped() {
        let b = Arc::new(broadcaster());
        let nested = Arc::new(Mutex::new(None));

        let inner = Arc::downgrade(&b);
        let seen = Arc::clone(&nested);
        b.register_logout_callback(move || {
            if let Some(b) = inner.upgrade() {
                *seen.lock() = Some(b.execute_logout().skipped);
            }
            Ok(())
        });

        let report = b.execute_logout();
        assert!(!report.skipped);
        assert_eq!(*nested.lock(), Some(true));
    }
}
