//! Request deduplication cache
//!
//! Provides [`DedupCache`], used by the timeline/history data path:
//! - fresh entries are served without a network call
//! - callers queue behind a single drain lock and re-check the cache once it
//!   is their turn, so concurrent callers for one key trigger one producer call
//! - a short debounce window after a request settles swallows repeats of it,
//!   failed ones included
//! - deep-equal results keep the previous `Arc` so downstream consumers can
//!   skip re-rendering, while the entry timestamp is still refreshed

use crate::key::FilterKey;
use dashmap::DashMap;
use moka::future::Cache;
use oee_lifecycle::{Clearable, ClearableSet};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Name used in logs and by [`Clearable::name`]
    pub name: String,
    /// Freshness window
    pub ttl: Duration,
    /// Identical requests issued within this window are not re-issued
    pub debounce: Duration,
    /// Upper bound on stored keys
    pub max_entries: u64,
}

impl CacheConfig {
    /// Defaults: 30s TTL, 1s debounce, 256 keys
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ttl: Duration::from_secs(30),
            debounce: Duration::from_secs(1),
            max_entries: 256,
        }
    }

    /// With freshness window
    #[inline]
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// With debounce window
    #[inline]
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// With capacity
    #[inline]
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: u64) -> Self {
        self.max_entries = max_entries;
        self
    }
}

/// Stored value with the instant it was last refreshed
#[derive(Debug)]
pub struct CacheEntry<T> {
    /// Cached value
    pub data: Arc<T>,
    /// Last refresh
    pub stored_at: Instant,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            stored_at: self.stored_at,
        }
    }
}

impl<T> CacheEntry<T> {
    /// Whether the entry is still usable at `now`
    #[inline]
    #[must_use]
    pub fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < ttl
    }
}

/// Counters for cache behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Served from a fresh entry on the fast path
    pub hits: u64,
    /// Fell through the fast path and queued for the drain lock
    pub misses: u64,
    /// Served by a fresh entry found after waiting in the queue
    pub coalesced: u64,
    /// Answered from a request for the same key that settled moments ago
    pub debounced: u64,
    /// Producer invocations
    pub producer_calls: u64,
    /// Producer invocations that failed
    pub producer_failures: u64,
    /// Callers currently waiting for the drain lock
    pub queued: usize,
    /// Approximate number of stored keys
    pub entries: u64,
    /// Keys still inside their debounce window
    pub debounce_keys: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    debounced: AtomicU64,
    producer_calls: AtomicU64,
    producer_failures: AtomicU64,
}

/// Last settled request for a key
struct Settled {
    at: Instant,
    /// The producer's error, when it failed
    failure: Option<Arc<dyn Any + Send + Sync>>,
}

/// Per-key cache with TTL, debounce and coalescing
pub struct DedupCache<T> {
    config: CacheConfig,
    entries: Cache<FilterKey, CacheEntry<T>>,
    settled: DashMap<FilterKey, Settled>,
    drain: Mutex<()>,
    queued: AtomicUsize,
    counters: Counters,
}

impl<T> DedupCache<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    /// Create a cache
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let entries = Cache::builder()
            .name(&config.name)
            .max_capacity(config.max_entries)
            .build();
        Self {
            config,
            entries,
            settled: DashMap::new(),
            drain: Mutex::new(()),
            queued: AtomicUsize::new(0),
            counters: Counters::default(),
        }
    }

    /// Create a cache and register it for logout clearing
    #[must_use]
    pub fn registered(config: CacheConfig, set: &ClearableSet) -> Arc<Self> {
        let cache = Arc::new(Self::new(config));
        set.register(&cache);
        cache
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Return the cached value for `key` or run `producer` for it
    ///
    /// At most one producer runs at a time; every caller re-checks the cache
    /// when its turn comes, so N concurrent callers for one key cause a single
    /// producer call and all receive the same `Arc`. A key that settled within
    /// the debounce window is not re-issued: callers get the stored value, or
    /// a clone of the error if that request failed.
    ///
    /// # Errors
    /// Returns the producer's error, or the one it returned moments ago.
    /// Failures never become entries.
    pub async fn fetch<F, Fut, E>(&self, key: &FilterKey, producer: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Clone + Send + Sync + 'static,
    {
        if let Some(entry) = self.entries.get(key).await {
            if entry.is_fresh(self.config.ttl, Instant::now()) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(cache = %self.config.name, key = %key, "cache hit");
                return Ok(entry.data);
            }
        }
        if let Some(outcome) = self.debounced(key).await {
            return outcome;
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let slot = QueueSlot::enter(&self.queued);
        let _turn = self.drain.lock().await;
        drop(slot);

        let previous = self.entries.get(key).await;
        if let Some(entry) = &previous {
            if entry.is_fresh(self.config.ttl, Instant::now()) {
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(cache = %self.config.name, key = %key, "served by queued request");
                return Ok(Arc::clone(&entry.data));
            }
        }
        if let Some(outcome) = self.debounced(key).await {
            return outcome;
        }

        self.counters.producer_calls.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(cache = %self.config.name, key = %key, "cache miss; fetching");

        let value = match producer().await {
            Ok(value) => value,
            Err(e) => {
                self.counters.producer_failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(cache = %self.config.name, key = %key, "producer failed; nothing cached");
                let failure: Arc<dyn Any + Send + Sync> = Arc::new(e.clone());
                self.settle(key, Some(failure));
                return Err(e);
            }
        };

        let data = match previous {
            Some(prev) if *prev.data == value => {
                tracing::trace!(cache = %self.config.name, key = %key, "result unchanged; keeping previous value");
                prev.data
            }
            _ => Arc::new(value),
        };

        self.entries
            .insert(
                key.clone(),
                CacheEntry {
                    data: Arc::clone(&data),
                    stored_at: Instant::now(),
                },
            )
            .await;
        self.settle(key, None);

        Ok(data)
    }

    /// Stored entry for `key`, fresh or not
    pub async fn entry(&self, key: &FilterKey) -> Option<CacheEntry<T>> {
        self.entries.get(key).await
    }

    /// Fresh value for `key`, without producing
    pub async fn get_fresh(&self, key: &FilterKey) -> Option<Arc<T>> {
        self.entries
            .get(key)
            .await
            .filter(|entry| entry.is_fresh(self.config.ttl, Instant::now()))
            .map(|entry| entry.data)
    }

    /// Drop one key, including its debounce record
    pub async fn invalidate(&self, key: &FilterKey) {
        self.entries.invalidate(key).await;
        self.settled.remove(key);
    }

    /// Drop everything
    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.settled.clear();
        tracing::debug!(cache = %self.config.name, "cache cleared");
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            debounced: self.counters.debounced.load(Ordering::Relaxed),
            producer_calls: self.counters.producer_calls.load(Ordering::Relaxed),
            producer_failures: self.counters.producer_failures.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            entries: self.entries.entry_count(),
            debounce_keys: self.settled.len(),
        }
    }

    /// Outcome of a request for `key` that settled inside the debounce window
    async fn debounced<E>(&self, key: &FilterKey) -> Option<Result<Arc<T>, E>>
    where
        E: Clone + Send + Sync + 'static,
    {
        let failure = {
            let settled = self.settled.get(key)?;
            if Instant::now().saturating_duration_since(settled.at) >= self.config.debounce {
                return None;
            }
            settled.failure.clone()
        };
        let outcome = match failure {
            Some(failure) => Err(failure.downcast_ref::<E>()?.clone()),
            None => Ok(self.entries.get(key).await?.data),
        };
        self.counters.debounced.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(cache = %self.config.name, key = %key, failed = outcome.is_err(), "request debounced");
        Some(outcome)
    }

    /// Record that a request for `key` just settled, dropping expired records
    fn settle(&self, key: &FilterKey, failure: Option<Arc<dyn Any + Send + Sync>>) {
        let now = Instant::now();
        let debounce = self.config.debounce;
        self.settled
            .retain(|_, s| now.saturating_duration_since(s.at) < debounce);
        self.settled.insert(key.clone(), Settled { at: now, failure });
    }
}

impl<T> Clearable for DedupCache<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.config.name
    }

    fn clear(&self) {
        DedupCache::clear(self);
    }
}

impl<T> fmt::Debug for DedupCache<T>
where
    T: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedupCache")
            .field("config", &self.config)
            .field("entries", &self.entries.entry_count())
            .finish_non_exhaustive()
    }
}

/// Counts a caller as queued until it gets the drain lock or is dropped
struct QueueSlot<'a>(&'a AtomicUsize);

impl<'a> QueueSlot<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    #[derive(Debug, Clone, PartialEq)]
    struct Timeline {
        events: Vec<&'static str>,
    }

    fn timeline(events: &[&'static str]) -> Timeline {
        Timeline {
            events: events.to_vec(),
        }
    }

    fn key(lines: &[&str]) -> FilterKey {
        FilterKey::builder("timeline").list("lines", lines).build()
    }

    fn cache() -> DedupCache<Timeline> {
        DedupCache::new(CacheConfig::new("timeline"))
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_producer_call() {
        let cache = cache();
        let calls = &AtomicUsize::new(0);
        let k = key(&["L1", "L2"]);

        let results = join_all((0..5).map(|_| {
            cache.fetch(&k, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, String>(timeline(&["run", "stop"]))
            })
        }))
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first = results[0].as_ref().unwrap();
        for r in &results {
            assert!(Arc::ptr_eq(first, r.as_ref().unwrap()));
        }
        let stats = cache.stats();
        assert_eq!(stats.producer_calls, 1);
        assert_eq!(stats.coalesced, 4);
        assert_eq!(stats.misses, 5);
        assert_eq!(stats.queued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_entry_is_served_without_producer() {
        let cache = cache();
        let k = key(&["L1"]);
        cache
            .fetch(&k, || async { Ok::<_, String>(timeline(&["run"])) })
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        let value = cache
            .fetch(&k, || async { Err::<Timeline, _>("must not be called".to_string()) })
            .await
            .unwrap();

        assert_eq!(value.events, vec!["run"]);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_refetched_and_timestamp_refreshed() {
        let cache = cache();
        let k = key(&["L1"]);
        let first = cache
            .fetch(&k, || async { Ok::<_, String>(timeline(&["run"])) })
            .await
            .unwrap();
        let first_stored = cache.entry(&k).await.unwrap().stored_at;

        tokio::time::advance(Duration::from_secs(31)).await;
        let calls = &AtomicUsize::new(0);
        let second = cache
            .fetch(&k, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(timeline(&["run"]))
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Deep-equal result keeps the previous allocation
        assert!(Arc::ptr_eq(&first, &second));
        let refreshed = cache.entry(&k).await.unwrap().stored_at;
        assert!(refreshed > first_stored);

        // Refreshed timestamp means the entry is fresh again
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(cache.get_fresh(&k).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn changed_result_replaces_entry() {
        let cache = cache();
        let k = key(&["L1"]);
        let first = cache
            .fetch(&k, || async { Ok::<_, String>(timeline(&["run"])) })
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        let second = cache
            .fetch(&k, || async { Ok::<_, String>(timeline(&["run", "stop"])) })
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.events, vec!["run", "stop"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_not_cached() {
        let cache = cache();
        let k = key(&["L1"]);

        let err = cache
            .fetch(&k, || async { Err::<Timeline, _>("503".to_string()) })
            .await
            .unwrap_err();
        assert_eq!(err, "503");
        assert!(cache.entry(&k).await.is_none());

        tokio::time::advance(Duration::from_secs(2)).await;
        let value = cache
            .fetch(&k, || async { Ok::<_, String>(timeline(&["run"])) })
            .await
            .unwrap();
        assert_eq!(value.events, vec!["run"]);
        assert_eq!(cache.stats().producer_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_keeps_previous_entry_untouched() {
        let cache = DedupCache::new(CacheConfig::new("timeline").with_ttl(Duration::from_secs(5)));
        let k = key(&["L1"]);
        cache
            .fetch(&k, || async { Ok::<_, String>(timeline(&["run"])) })
            .await
            .unwrap();
        let stored = cache.entry(&k).await.unwrap().stored_at;

        tokio::time::advance(Duration::from_secs(6)).await;
        let _ = cache
            .fetch(&k, || async { Err::<Timeline, _>("timeout".to_string()) })
            .await;

        let entry = cache.entry(&k).await.unwrap();
        assert_eq!(entry.stored_at, stored);
        assert_eq!(entry.data.events, vec!["run"]);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_suppresses_bursts_of_the_same_request() {
        let cache = DedupCache::new(
            CacheConfig::new("timeline")
                .with_ttl(Duration::ZERO)
                .with_debounce(Duration::from_secs(1)),
        );
        let k = key(&["L1"]);
        let calls = &AtomicUsize::new(0);
        let produce = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(timeline(&["run"]))
        };

        cache.fetch(&k, produce).await.unwrap();
        tokio::time::advance(Duration::from_millis(300)).await;
        cache.fetch(&k, produce).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().debounced, 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        cache.fetch(&k, produce).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_shared_with_queued_callers() {
        let cache = cache();
        let calls = &AtomicUsize::new(0);
        let k = key(&["L1"]);

        let results = join_all((0..5).map(|_| {
            cache.fetch(&k, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(200)).await;
                Err::<Timeline, _>("503".to_string())
            })
        }))
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_ref().unwrap_err() == "503"));
        let stats = cache.stats();
        assert_eq!(stats.producer_calls, 1);
        assert_eq!(stats.producer_failures, 1);
        assert_eq!(stats.debounced, 4);

        // Once the window has passed the request goes out again
        tokio::time::advance(Duration::from_secs(1)).await;
        let value = cache
            .fetch(&k, || async { Ok::<_, String>(timeline(&["run"])) })
            .await
            .unwrap();
        assert_eq!(value.events, vec!["run"]);
        assert_eq!(cache.stats().producer_calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_ledger_forgets_settled_keys() {
        let cache = DedupCache::new(CacheConfig::new("timeline").with_max_entries(4));
        for minute in 0..200 {
            let k = FilterKey::builder("timeline").field("to", minute).build();
            cache
                .fetch(&k, || async { Ok::<_, String>(timeline(&["run"])) })
                .await
                .unwrap();
            tokio::time::advance(Duration::from_secs(60)).await;
        }
        assert_eq!(cache.stats().debounce_keys, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_fetch_independently() {
        let cache = cache();
        let calls = &AtomicUsize::new(0);
        for lines in [["L1"], ["L2"]] {
            cache
                .fetch(&key(&lines), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(timeline(&["run"]))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_through_clearable_set() {
        let set = ClearableSet::new();
        let cache: Arc<DedupCache<Timeline>> =
            DedupCache::registered(CacheConfig::new("timeline"), &set);
        let k = key(&["L1"]);
        cache
            .fetch(&k, || async { Ok::<_, String>(timeline(&["run"])) })
            .await
            .unwrap();

        assert_eq!(set.clear_all(), 1);
        assert!(cache.entry(&k).await.is_none());
    }
}
