//! Dashboard wiring
//!
//! Builds the shared lifecycle objects once and injects them everywhere:
//! - one [`IntervalRegistry`] and [`AuthFailureBroadcaster`] per dashboard
//! - the [`ApiClient`] and typed [`ProductionApi`]
//! - the [`ProductionStore`] and the caches behind the timeline and OEE views
//! - four pollers: production, timeline, OEE recompute and clock
//!
//! A logout (explicit or from a 401) stops every timer first, then stops the
//! view watcher, resets the store, forgets the token and clears every
//! registered cache. Nothing runs again until the next [`Dashboard::start`].

use crate::api::{OeeSummary, ProductionApi, TimelineEvent, TimelineQuery};
use crate::clock::ClockTicker;
use crate::config::DashboardConfig;
use crate::controller::ProductionController;
use crate::error::DashboardError;
use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use oee_cache::{CacheConfig, DedupCache, FilterKey};
use oee_client::{ApiClient, ApiError, ClientConfig, Navigator, TokenStorage, Transport};
use oee_lifecycle::{
    AuthFailureBroadcaster, CallbackId, ClearableSet, IntervalRegistry, LogoutReport,
};
use oee_poll::{poll_fn, PollError, PollTask, Poller, PollerConfig, PollerState, Visibility};
use oee_store::{ProductionStore, StoreSnapshot, View};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Timeline results as published to the view
pub type Timeline = Arc<Vec<TimelineEvent>>;

/// External collaborators of the dashboard
#[derive(Clone)]
pub struct DashboardDeps {
    /// HTTP transport
    pub transport: Arc<dyn Transport>,
    /// Durable token storage
    pub storage: Arc<dyn TokenStorage>,
    /// Login redirect
    pub navigator: Arc<dyn Navigator>,
    /// Window visibility signal
    pub visibility: Visibility,
}

impl DashboardDeps {
    /// Dependencies with a fresh, visible window signal
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Arc<dyn TokenStorage>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            transport,
            storage,
            navigator,
            visibility: Visibility::new(),
        }
    }

    /// With a shared visibility signal
    #[must_use]
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }
}

struct Pollers {
    production: Arc<Poller>,
    timeline: Poller,
    oee: Poller,
    clock: Poller,
}

impl Pollers {
    fn reconcile_all(&self) {
        self.production.reconcile();
        self.timeline.reconcile();
        self.oee.reconcile();
        self.clock.reconcile();
    }

    fn stop_all(&self) {
        self.production.stop();
        self.timeline.stop();
        self.oee.stop();
        self.clock.stop();
    }
}

/// Snapshot of poller states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerStates {
    pub production: PollerState,
    pub timeline: PollerState,
    pub oee: PollerState,
    pub clock: PollerState,
}

/// Fetches timeline windows through the dedup cache
#[derive(Clone)]
struct TimelineSource {
    api: ProductionApi,
    cache: Arc<DedupCache<Vec<TimelineEvent>>>,
    window_hours: u32,
}

impl TimelineSource {
    async fn fetch(&self, lines: &[String]) -> Result<Timeline, ApiError> {
        // Minute granularity keeps successive polls on the same key
        let to = Utc::now()
            .duration_trunc(ChronoDuration::minutes(1))
            .unwrap_or_else(|_| Utc::now());
        let from = to - ChronoDuration::hours(i64::from(self.window_hours));
        let key = FilterKey::builder("timeline")
            .list("lines", lines)
            .field("from", from.timestamp())
            .field("to", to.timestamp())
            .build();
        let query = TimelineQuery {
            lines: lines.to_vec(),
            from,
            to,
        };
        self.cache.fetch(&key, || self.api.timeline(&query)).await
    }
}

/// The dashboard's sync engine for one controlled line
pub struct Dashboard {
    config: DashboardConfig,
    line_id: String,
    registry: Arc<IntervalRegistry>,
    broadcaster: Arc<AuthFailureBroadcaster>,
    clearables: Arc<ClearableSet>,
    client: Arc<ApiClient>,
    api: ProductionApi,
    store: Arc<ProductionStore>,
    timeline_source: TimelineSource,
    oee_cache: Arc<DedupCache<OeeSummary>>,
    timeline: Arc<watch::Sender<Timeline>>,
    oee: Arc<watch::Sender<Option<Arc<OeeSummary>>>>,
    clock: Arc<ClockTicker>,
    visibility: Visibility,
    pollers: Arc<Pollers>,
    controller: ProductionController,
    logout_callback: Mutex<Option<CallbackId>>,
    watcher: Arc<Mutex<Option<CancellationToken>>>,
    shut_down: AtomicBool,
}

impl Dashboard {
    /// Wire every component; nothing runs until [`Dashboard::start`]
    ///
    /// # Errors
    /// Returns [`DashboardError::Config`] if the configuration is invalid.
    pub fn new(config: DashboardConfig, deps: DashboardDeps) -> Result<Self, DashboardError> {
        config.validate()?;
        let line_id = config
            .primary_line()
            .map(str::to_string)
            .ok_or_else(|| crate::error::ConfigError::Invalid("lines is empty".to_string()))?;

        let registry = Arc::new(IntervalRegistry::new());
        let broadcaster = Arc::new(AuthFailureBroadcaster::new(Arc::clone(&registry)));
        let clearables = Arc::new(ClearableSet::new());

        let client = Arc::new(ApiClient::new(
            ClientConfig::new(config.api.base_url.clone())
                .with_auth_ignore_paths(config.api.auth_ignore_paths.clone()),
            deps.transport,
            deps.storage,
            deps.navigator,
            Arc::clone(&broadcaster),
        ));
        let api = ProductionApi::new(Arc::clone(&client));
        let store = Arc::new(ProductionStore::new(line_id.clone()));

        let timeline_cache = DedupCache::registered(
            CacheConfig::new("timeline")
                .with_ttl(config.cache.timeline_ttl())
                .with_debounce(config.cache.debounce())
                .with_max_entries(config.cache.max_entries),
            &clearables,
        );
        let oee_cache = DedupCache::registered(
            CacheConfig::new("oee-history")
                .with_ttl(config.cache.oee_history_ttl())
                .with_debounce(config.cache.debounce())
                .with_max_entries(config.cache.max_entries),
            &clearables,
        );
        let timeline_source = TimelineSource {
            api: api.clone(),
            cache: timeline_cache,
            window_hours: config.timeline_window_hours,
        };

        let timeline = Arc::new(watch::channel(Timeline::default()).0);
        let oee = Arc::new(watch::channel(None).0);
        let clock = Arc::new(ClockTicker::new());
        let visibility = deps.visibility;

        let pollers = Arc::new(Self::build_pollers(
            &config,
            &line_id,
            &registry,
            &client,
            &api,
            &store,
            &timeline_source,
            &timeline,
            &oee,
            &clock,
            &visibility,
        ));
        let controller = ProductionController::new(
            api.clone(),
            Arc::clone(&store),
            Arc::clone(&pollers.production),
        );

        tracing::info!(
            line = %line_id,
            base_url = %config.api.base_url,
            "dashboard created"
        );

        Ok(Self {
            config,
            line_id,
            registry,
            broadcaster,
            clearables,
            client,
            api,
            store,
            timeline_source,
            oee_cache,
            timeline,
            oee,
            clock,
            visibility,
            pollers,
            controller,
            logout_callback: Mutex::new(None),
            watcher: Arc::new(Mutex::new(None)),
            shut_down: AtomicBool::new(false),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_pollers(
        config: &DashboardConfig,
        line_id: &str,
        registry: &Arc<IntervalRegistry>,
        client: &Arc<ApiClient>,
        api: &ProductionApi,
        store: &Arc<ProductionStore>,
        timeline_source: &TimelineSource,
        timeline: &Arc<watch::Sender<Timeline>>,
        oee: &Arc<watch::Sender<Option<Arc<OeeSummary>>>>,
        clock: &Arc<ClockTicker>,
        visibility: &Visibility,
    ) -> Pollers {
        let polling = &config.polling;

        let production = {
            let api = api.clone();
            let store = Arc::clone(store);
            let line = line_id.to_string();
            let authenticated = Arc::clone(client);
            Poller::builder(
                PollerConfig::new("production", polling.production_interval())
                    .with_max_consecutive_errors(polling.max_consecutive_errors)
                    .with_pause_when_hidden(polling.pause_when_hidden),
                poll_fn(move || {
                    let api = api.clone();
                    let store = Arc::clone(&store);
                    let line = line.clone();
                    async move {
                        let payload = api.production(&line).await?;
                        store.apply_server_state(payload.into());
                        Ok::<(), PollError>(())
                    }
                }),
                Arc::clone(registry),
            )
            .with_enabled(move || authenticated.is_authenticated())
            .with_visibility(visibility.clone())
            .build()
        };

        let timeline_poller = {
            let source = timeline_source.clone();
            let lines = config.lines.clone();
            let publish = Arc::clone(timeline);
            let view_store = Arc::clone(store);
            let authenticated = Arc::clone(client);
            Poller::builder(
                PollerConfig::new("timeline", polling.timeline_interval())
                    .with_max_consecutive_errors(polling.max_consecutive_errors),
                poll_fn(move || {
                    let source = source.clone();
                    let lines = lines.clone();
                    let publish = Arc::clone(&publish);
                    async move {
                        let events = source.fetch(&lines).await?;
                        publish.send_if_modified(|current| {
                            if Arc::ptr_eq(current, &events) {
                                return false;
                            }
                            *current = events;
                            true
                        });
                        Ok::<(), PollError>(())
                    }
                }),
                Arc::clone(registry),
            )
            .with_enabled(move || {
                authenticated.is_authenticated()
                    && view_store.snapshot().navigation.current == View::Timeline
            })
            .build()
        };

        let oee_poller = {
            let api = api.clone();
            let line = line_id.to_string();
            let publish = Arc::clone(oee);
            let view_store = Arc::clone(store);
            let authenticated = Arc::clone(client);
            Poller::builder(
                PollerConfig::new("oee", polling.oee_interval())
                    .with_max_consecutive_errors(polling.max_consecutive_errors),
                poll_fn(move || {
                    let api = api.clone();
                    let line = line.clone();
                    let publish = Arc::clone(&publish);
                    async move {
                        let summary = api.recompute_oee(&line).await?;
                        publish.send_replace(Some(Arc::new(summary)));
                        Ok::<(), PollError>(())
                    }
                }),
                Arc::clone(registry),
            )
            .with_enabled(move || {
                authenticated.is_authenticated()
                    && view_store.snapshot().navigation.current == View::Oee
            })
            .build()
        };

        let clock_poller = Poller::builder(
            PollerConfig::new("clock", polling.clock_interval()).with_max_consecutive_errors(0),
            Arc::clone(clock) as Arc<dyn PollTask>,
            Arc::clone(registry),
        )
        .build();

        Pollers {
            production: Arc::new(production),
            timeline: timeline_poller,
            oee: oee_poller,
            clock: clock_poller,
        }
    }

    /// Register the logout callback, start the view watcher and reconcile pollers
    ///
    /// Safe to call again after a logout. Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// [`DashboardError::ShutDown`] after [`Dashboard::shutdown`].
    pub fn start(&self) -> Result<(), DashboardError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(DashboardError::ShutDown);
        }
        self.register_logout_callback();
        self.spawn_view_watcher();
        self.pollers.reconcile_all();
        tracing::info!(line = %self.line_id, states = ?self.poller_states(), "dashboard started");
        Ok(())
    }

    /// Store a token and start
    ///
    /// # Errors
    /// See [`Dashboard::start`].
    pub fn login(&self, token: impl Into<String>) -> Result<(), DashboardError> {
        self.client.set_token(token);
        self.start()
    }

    /// Start or stop pollers to match the current view and session
    pub fn sync_views(&self) -> PollerStates {
        self.pollers.reconcile_all();
        self.poller_states()
    }

    /// Navigate and reconcile pollers
    pub fn navigate(&self, view: View) -> PollerStates {
        self.store.navigate(view);
        self.sync_views()
    }

    /// Log out: stop every timer, then run every logout callback
    pub fn logout(&self) -> LogoutReport {
        let report = self.broadcaster.execute_logout();
        tracing::info!(
            line = %self.line_id,
            intervals = report.intervals_cleared,
            callbacks = report.callbacks_run,
            failures = report.failures.len(),
            "logged out"
        );
        report
    }

    /// Stop everything for good
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(token) = self.watcher.lock().take() {
            token.cancel();
        }
        self.pollers.stop_all();
        if let Some(id) = self.logout_callback.lock().take() {
            self.broadcaster.unregister_logout_callback(id);
        }
        tracing::info!(line = %self.line_id, "dashboard shut down");
    }

    /// Timeline for `lines` through the dedup cache
    ///
    /// # Errors
    /// Any [`ApiError`]; failures are not cached.
    pub async fn timeline_for(&self, lines: &[String]) -> Result<Timeline, ApiError> {
        self.timeline_source.fetch(lines).await
    }

    /// Latest OEE breakdown for the controlled line through the history cache
    ///
    /// # Errors
    /// Any [`ApiError`]; failures are not cached.
    pub async fn oee_summary(&self) -> Result<Arc<OeeSummary>, ApiError> {
        let key = FilterKey::builder("oee").field("line", &self.line_id).build();
        self.oee_cache
            .fetch(&key, || self.api.oee(&self.line_id))
            .await
    }

    /// Current poller states
    #[must_use]
    pub fn poller_states(&self) -> PollerStates {
        PollerStates {
            production: self.pollers.production.state(),
            timeline: self.pollers.timeline.state(),
            oee: self.pollers.oee.state(),
            clock: self.pollers.clock.state(),
        }
    }

    /// Force a production poll now
    pub async fn refresh_production(&self) {
        self.pollers.production.refresh().await;
    }

    /// Operator actions
    #[inline]
    #[must_use]
    pub fn controller(&self) -> &ProductionController {
        &self.controller
    }

    /// Production state
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<ProductionStore> {
        &self.store
    }

    /// Current store snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.store.snapshot()
    }

    /// Timeline updates
    #[must_use]
    pub fn subscribe_timeline(&self) -> watch::Receiver<Timeline> {
        self.timeline.subscribe()
    }

    /// OEE updates
    #[must_use]
    pub fn subscribe_oee(&self) -> watch::Receiver<Option<Arc<OeeSummary>>> {
        self.oee.subscribe()
    }

    /// Clock ticks
    #[must_use]
    pub fn subscribe_clock(&self) -> watch::Receiver<DateTime<Utc>> {
        self.clock.subscribe()
    }

    /// Window visibility signal
    #[inline]
    #[must_use]
    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    /// Timer registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<IntervalRegistry> {
        &self.registry
    }

    /// Logout broadcaster
    #[inline]
    #[must_use]
    pub fn broadcaster(&self) -> &Arc<AuthFailureBroadcaster> {
        &self.broadcaster
    }

    /// REST client
    #[inline]
    #[must_use]
    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    fn register_logout_callback(&self) {
        let mut slot = self.logout_callback.lock();
        if let Some(previous) = slot.take() {
            self.broadcaster.unregister_logout_callback(previous);
        }

        let store = Arc::clone(&self.store);
        let client = Arc::clone(&self.client);
        let clearables = Arc::clone(&self.clearables);
        let timeline = Arc::clone(&self.timeline);
        let oee = Arc::clone(&self.oee);
        let watcher = Arc::clone(&self.watcher);
        let id = self.broadcaster.register_logout_callback(move || {
            // The reset below changes the view; the watcher must not restart timers
            if let Some(token) = watcher.lock().take() {
                token.cancel();
            }
            client.clear_token();
            store.reset();
            let cleared = clearables.clear_all();
            timeline.send_replace(Timeline::default());
            oee.send_replace(None);
            tracing::debug!(caches = cleared, "session state cleared");
            Ok(())
        });
        *slot = Some(id);
    }

    fn spawn_view_watcher(&self) {
        let mut slot = self.watcher.lock();
        if slot.as_ref().is_some_and(|t| !t.is_cancelled()) {
            return;
        }
        let token = CancellationToken::new();
        let mut rx = self.store.subscribe();
        let pollers = Arc::clone(&self.pollers);
        let cancelled = token.clone();
        let mut current = rx.borrow_and_update().navigation.current;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancelled.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let view = rx.borrow_and_update().navigation.current;
                if view != current {
                    current = view;
                    tracing::debug!(view = ?view, "view changed; reconciling pollers");
                    pollers.reconcile_all();
                }
            }
        });
        *slot = Some(token);
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dashboard")
            .field("line_id", &self.line_id)
            .field("pollers", &self.poller_states())
            .field("active_intervals", &self.registry.active_intervals_count())
            .finish_non_exhaustive()
    }
}
