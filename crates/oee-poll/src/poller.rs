//! Interval pollers
//!
//! A [`Poller`] runs one [`PollTask`] on a fixed schedule:
//! - the enablement predicate decides whether it runs at all
//! - hidden or unfocused windows skip ticks when `pause_when_hidden` is set
//! - consecutive failures past a threshold suspend the poll body
//! - every live timer is tracked in the shared [`IntervalRegistry`]
//!
//! Polls of one poller never overlap. A cancelled poller lets an in-flight
//! poll finish but never starts another.

use crate::error::PollError;
use crate::visibility::Visibility;
use async_trait::async_trait;
use oee_lifecycle::{IntervalRegistry, TimerHandle, TimerId};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Predicate deciding whether a poller should be running
pub type EnabledFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Body of a poll
#[async_trait]
pub trait PollTask: Send + Sync {
    /// Fetch once and publish the result
    async fn poll(&self) -> Result<(), PollError>;
}

/// [`PollTask`] backed by a closure returning a future
pub struct FnTask<F>(F);

#[async_trait]
impl<F, Fut> PollTask for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), PollError>> + Send,
{
    async fn poll(&self) -> Result<(), PollError> {
        (self.0)().await
    }
}

/// Wrap a closure as a shared poll task
pub fn poll_fn<F, Fut>(f: F) -> Arc<dyn PollTask>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), PollError>> + Send + 'static,
{
    Arc::new(FnTask(f))
}

/// Poller configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Name used in logs
    pub name: String,
    /// Time between ticks
    pub interval: Duration,
    /// Consecutive failures that suspend polling; `0` never suspends
    pub max_consecutive_errors: u32,
    /// Poll as soon as the poller starts
    pub poll_immediately: bool,
    /// Skip ticks while the window is hidden or unfocused
    pub pause_when_hidden: bool,
}

impl PollerConfig {
    /// Defaults: 3 failures suspend, first poll immediate, runs when hidden
    #[must_use]
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            max_consecutive_errors: 3,
            poll_immediately: true,
            pause_when_hidden: false,
        }
    }

    /// With suspension threshold
    #[inline]
    #[must_use]
    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max;
        self
    }

    /// With first-poll behaviour
    #[inline]
    #[must_use]
    pub fn with_poll_immediately(mut self, poll_immediately: bool) -> Self {
        self.poll_immediately = poll_immediately;
        self
    }

    /// With visibility gating
    #[inline]
    #[must_use]
    pub fn with_pause_when_hidden(mut self, pause: bool) -> Self {
        self.pause_when_hidden = pause;
        self
    }
}

/// Lifecycle state of a poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// No timer
    Idle,
    /// Timer live, polls running
    Active,
    /// Timer live, poll body skipped after too many failures
    Suspended,
}

/// Poller counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerStats {
    /// Poll bodies executed, including refreshes
    pub polls: u64,
    /// Poll bodies that failed
    pub failures: u64,
    /// Ticks skipped because the window was hidden
    pub skipped_hidden: u64,
    /// Ticks skipped because polling was suspended
    pub skipped_suspended: u64,
}

#[derive(Debug, Default)]
struct Counters {
    polls: AtomicU64,
    failures: AtomicU64,
    skipped_hidden: AtomicU64,
    skipped_suspended: AtomicU64,
}

struct Running {
    handle: TimerHandle,
    token: CancellationToken,
}

struct Inner {
    config: PollerConfig,
    task: Arc<dyn PollTask>,
    enabled: EnabledFn,
    visibility: Option<Visibility>,
    registry: Arc<IntervalRegistry>,
    running: Mutex<Option<Running>>,
    gate: tokio::sync::Mutex<()>,
    streak: AtomicU32,
    counters: Counters,
}

impl Inner {
    fn is_suspended(&self) -> bool {
        let max = self.config.max_consecutive_errors;
        max > 0 && self.streak.load(Ordering::Acquire) >= max
    }

    fn is_hidden(&self) -> bool {
        self.config.pause_when_hidden
            && self.visibility.as_ref().is_some_and(|v| !v.is_visible())
    }

    async fn tick(&self, token: &CancellationToken) {
        if self.is_hidden() {
            self.counters.skipped_hidden.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(poller = %self.config.name, "window hidden; tick skipped");
            return;
        }
        if self.is_suspended() {
            self.counters
                .skipped_suspended
                .fetch_add(1, Ordering::Relaxed);
            tracing::trace!(poller = %self.config.name, "polling suspended; tick skipped");
            return;
        }
        self.poll_once(Some(token)).await;
    }

    async fn poll_once(&self, token: Option<&CancellationToken>) {
        let _gate = self.gate.lock().await;
        if token.is_some_and(CancellationToken::is_cancelled) {
            return;
        }

        self.counters.polls.fetch_add(1, Ordering::Relaxed);
        match self.task.poll().await {
            Ok(()) => {
                let previous = self.streak.swap(0, Ordering::AcqRel);
                let max = self.config.max_consecutive_errors;
                if max > 0 && previous >= max {
                    tracing::info!(poller = %self.config.name, "polling resumed");
                }
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                let streak = self.streak.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::warn!(poller = %self.config.name, streak, "poll failed: {}", e);
                if streak == self.config.max_consecutive_errors {
                    tracing::warn!(
                        poller = %self.config.name,
                        "{} consecutive failures; polling suspended",
                        streak
                    );
                }
            }
        }
    }

    /// Release the timer if it is still the current one
    fn detach(&self, id: TimerId, token: &CancellationToken) {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| r.handle.id() == id) {
            *running = None;
        }
        drop(running);
        self.registry.unregister_interval(id);
        token.cancel();
    }
}

async fn run(inner: Arc<Inner>, token: CancellationToken, id: TimerId) {
    let period = inner.config.interval;
    let first = if inner.config.poll_immediately {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = time::interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if !(inner.enabled)() {
            tracing::debug!(poller = %inner.config.name, "disabled; going idle");
            break;
        }
        inner.tick(&token).await;
    }

    inner.detach(id, &token);
    tracing::debug!(poller = %inner.config.name, timer = %id, "poll loop exited");
}

/// Builder for [`Poller`]
pub struct PollerBuilder {
    config: PollerConfig,
    task: Arc<dyn PollTask>,
    registry: Arc<IntervalRegistry>,
    enabled: EnabledFn,
    visibility: Option<Visibility>,
}

impl PollerBuilder {
    /// Only run while `enabled` returns true
    #[must_use]
    pub fn with_enabled<F>(mut self, enabled: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.enabled = Arc::new(enabled);
        self
    }

    /// Gate ticks on this visibility signal
    #[must_use]
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    /// Build an idle poller
    #[must_use]
    pub fn build(self) -> Poller {
        let mut config = self.config;
        // tokio intervals reject a zero period
        config.interval = config.interval.max(Duration::from_millis(1));
        Poller {
            inner: Arc::new(Inner {
                config,
                task: self.task,
                enabled: self.enabled,
                visibility: self.visibility,
                registry: self.registry,
                running: Mutex::new(None),
                gate: tokio::sync::Mutex::new(()),
                streak: AtomicU32::new(0),
                counters: Counters::default(),
            }),
        }
    }
}

/// A scheduled poll with error-streak suspension
///
/// Dropping the poller stops it.
pub struct Poller {
    inner: Arc<Inner>,
}

impl Poller {
    /// Start building a poller; enabled unconditionally unless a predicate is set
    #[must_use]
    pub fn builder(
        config: PollerConfig,
        task: Arc<dyn PollTask>,
        registry: Arc<IntervalRegistry>,
    ) -> PollerBuilder {
        PollerBuilder {
            config,
            task,
            registry,
            enabled: Arc::new(|| true),
            visibility: None,
        }
    }

    /// Name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PollerConfig {
        &self.inner.config
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> PollerState {
        if !self.is_active() {
            PollerState::Idle
        } else if self.inner.is_suspended() {
            PollerState::Suspended
        } else {
            PollerState::Active
        }
    }

    /// Whether a live timer exists
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner
            .running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.token.is_cancelled())
    }

    /// Consecutive failures so far
    #[inline]
    #[must_use]
    pub fn error_streak(&self) -> u32 {
        self.inner.streak.load(Ordering::Acquire)
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> PollerStats {
        let c = &self.inner.counters;
        PollerStats {
            polls: c.polls.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            skipped_hidden: c.skipped_hidden.load(Ordering::Relaxed),
            skipped_suspended: c.skipped_suspended.load(Ordering::Relaxed),
        }
    }

    /// Start or stop according to the enablement predicate
    ///
    /// Must be called from within a tokio runtime.
    pub fn reconcile(&self) -> PollerState {
        let enabled = (self.inner.enabled)();
        match (enabled, self.is_active()) {
            (true, false) => {
                self.start();
            }
            (false, true) => {
                self.stop();
            }
            _ => {}
        }
        self.state()
    }

    /// Register a timer and spawn the tick loop
    ///
    /// Returns `false` if already running or if the registry is being cleared.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut running = self.inner.running.lock();
        if running.as_ref().is_some_and(|r| !r.token.is_cancelled()) {
            return false;
        }

        let token = CancellationToken::new();
        let handle = TimerHandle::from_token(token.clone());
        if !self.inner.registry.register_interval(&handle) {
            token.cancel();
            *running = None;
            tracing::debug!(poller = %self.name(), "registry is clearing; start aborted");
            return false;
        }

        let id = handle.id();
        tokio::spawn(run(Arc::clone(&self.inner), token.clone(), id));
        *running = Some(Running { handle, token });
        tracing::info!(
            poller = %self.name(),
            timer = %id,
            interval = ?self.inner.config.interval,
            "poller started"
        );
        true
    }

    /// Unregister and cancel the timer
    ///
    /// Returns `false` if the poller was idle.
    pub fn stop(&self) -> bool {
        let Some(running) = self.inner.running.lock().take() else {
            return false;
        };
        self.inner.registry.unregister_interval(running.handle.id());
        running.token.cancel();
        tracing::info!(poller = %self.name(), timer = %running.handle.id(), "poller stopped");
        true
    }

    /// Reset the error streak and poll once now
    ///
    /// Runs even when idle or hidden. Waits for an in-flight poll first.
    pub async fn refresh(&self) {
        self.inner.streak.store(0, Ordering::Release);
        tracing::debug!(poller = %self.name(), "manual refresh");
        self.inner.poll_once(None).await;
    }

    /// Reset the error streak so the next tick polls again
    pub fn reset_errors(&self) {
        self.inner.streak.store(0, Ordering::Release);
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("error_streak", &self.error_streak())
            .finish()
    }
}
