//! Dedup cache core.
//!
//! One mutex guards both the completed-entry store and the in-flight map, and
//! it is only ever held for the O(1) lookup / insert / waiter-registration
//! step. Producers run in their own tokio task, outside the lock, so a slow
//! upstream call never blocks unrelated fingerprints and a caller that gives
//! up never cancels the call other callers are waiting on.

use super::flight::{self, InFlightRequest, Slot};
use super::key::Fingerprint;
use super::store::{CacheStore, EntrySnapshot, Lookup, Weigher};
use crate::telemetry::{noop_sink, MetricEvent, MetricsSink};
use crate::types::Completion;
use crate::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum age of an entry; older entries are treated as absent.
    pub ttl: Duration,
    /// Bound on the summed weight of all entries.
    pub max_weight: u64,
    pub weigher: Weigher,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_weight: 16 * 1024 * 1024,
            weigher: Weigher::Bytes,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
    pub fn with_max_weight(mut self, max_weight: u64) -> Self {
        self.max_weight = max_weight;
        self
    }
    pub fn with_weigher(mut self, weigher: Weigher) -> Self {
        self.weigher = weigher;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers that joined an in-flight request.
    pub joins: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Producer failures delivered to waiters (never cached).
    pub failures: u64,
    pub entries: usize,
    pub total_weight: u64,
    pub in_flight: usize,
}

impl CacheStats {
    /// Share of lookups answered without starting an upstream call.
    pub fn hit_ratio(&self) -> f64 {
        let served = self.hits + self.joins;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    joins: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    failures: AtomicU64,
}

impl AtomicStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            joins: AtomicU64::new(0),
            insertions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }
}

/// How a resolved completion was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from a live cache entry.
    Hit,
    /// Shared the result of another caller's in-flight request.
    Joined,
    /// This caller started the upstream call.
    Miss,
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub completion: Arc<Completion>,
    pub outcome: CacheOutcome,
}

enum Admission {
    Hit(Arc<Completion>),
    Join(watch::Receiver<Slot>),
    Lead(watch::Receiver<Slot>),
}

struct State {
    store: CacheStore,
    inflight: HashMap<Fingerprint, InFlightRequest>,
}

struct Inner {
    state: Mutex<State>,
    stats: AtomicStats,
    metrics: Arc<dyn MetricsSink>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Steps 1-3 of a resolve, under the lock: hit, join, or lead.
    fn admit(&self, fingerprint: Fingerprint, now: Instant) -> (Admission, bool) {
        let mut state = self.lock_state();
        let expired = match state.store.lookup(&fingerprint, now) {
            Lookup::Hit(completion) => return (Admission::Hit(completion), false),
            Lookup::Expired => true,
            Lookup::Absent => false,
        };
        if let Some(flight) = state.inflight.get_mut(&fingerprint) {
            return (Admission::Join(flight.join()), expired);
        }
        let (flight, rx) = InFlightRequest::start(now);
        state.inflight.insert(fingerprint, flight);
        (Admission::Lead(rx), expired)
    }

    /// Settle an in-flight request: populate on success, then wake every waiter.
    fn complete(&self, fingerprint: Fingerprint, result: Result<Completion>) {
        let now = Instant::now();
        let outcome = result.map(Arc::new);
        let (flight, inserted) = {
            let mut state = self.lock_state();
            let flight = state.inflight.remove(&fingerprint);
            let inserted = match outcome {
                Ok(ref completion) => {
                    Some(state.store.insert(fingerprint, Arc::clone(completion), now))
                }
                Err(_) => None,
            };
            (flight, inserted)
        };

        match (&outcome, inserted) {
            (Ok(_), Some(inserted)) => {
                if inserted.cached {
                    self.stats.insertions.fetch_add(1, Ordering::Relaxed);
                    self.metrics.record(MetricEvent::CacheInsert {
                        weight: inserted.weight,
                    });
                } else {
                    debug!(
                        fingerprint = %fingerprint.short(),
                        weight = inserted.weight,
                        "Completion heavier than the cache bound; not cached"
                    );
                }
                if inserted.evicted > 0 {
                    self.stats
                        .evictions
                        .fetch_add(inserted.evicted as u64, Ordering::Relaxed);
                    self.metrics.record(MetricEvent::Eviction {
                        count: inserted.evicted,
                    });
                }
            }
            (Err(e), _) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                debug!(
                    fingerprint = %fingerprint.short(),
                    error = %e,
                    "Producer failed; nothing cached"
                );
            }
            _ => {}
        }

        if let Some(flight) = flight {
            trace!(
                fingerprint = %fingerprint.short(),
                waiters = flight.waiters(),
                duration_ms = now.saturating_duration_since(flight.started_at()).as_millis() as u64,
                "In-flight request settled"
            );
            flight.publish(outcome);
        }
    }
}

/// Settles the in-flight request even if the producer panics or its task is
/// dropped before finishing.
struct FlightGuard {
    inner: Arc<Inner>,
    fingerprint: Fingerprint,
    settled: bool,
}

impl FlightGuard {
    fn settle(mut self, result: Result<Completion>) {
        self.settled = true;
        self.inner.complete(self.fingerprint, result);
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.inner.complete(
                self.fingerprint,
                Err(Error::permanent("producer task terminated", None)),
            );
        }
    }
}

/// Bounded completion cache with single-flight request coalescing.
///
/// Cheap to clone; clones share the same cache.
#[derive(Clone)]
pub struct DedupCache {
    inner: Arc<Inner>,
}

impl DedupCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_metrics(config, noop_sink())
    }

    pub fn with_metrics(config: CacheConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    store: CacheStore::new(config.max_weight, config.ttl, config.weigher),
                    inflight: HashMap::new(),
                }),
                stats: AtomicStats::new(),
                metrics,
            }),
        }
    }

    /// Return the completion for `fingerprint`, calling `producer` only if
    /// there is neither a live entry nor an in-flight request for it.
    ///
    /// `deadline` bounds how long this caller waits; it does not cancel the
    /// producer, whose result still populates the cache.
    pub async fn resolve<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        deadline: Instant,
        producer: F,
    ) -> Result<Arc<Completion>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Completion>> + Send + 'static,
    {
        self.resolve_with_outcome(fingerprint, deadline, producer)
            .await
            .map(|r| r.completion)
    }

    /// Like [`resolve`](Self::resolve), also reporting whether the answer was
    /// a hit, a dedup join, or a fresh upstream call.
    pub async fn resolve_with_outcome<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        deadline: Instant,
        producer: F,
    ) -> Result<Resolved>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Completion>> + Send + 'static,
    {
        let (admission, expired) = self.inner.admit(fingerprint, Instant::now());
        if expired {
            self.inner.stats.expirations.fetch_add(1, Ordering::Relaxed);
            self.inner.metrics.record(MetricEvent::Expiry { count: 1 });
        }

        match admission {
            Admission::Hit(completion) => {
                self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
                self.inner.metrics.record(MetricEvent::CacheHit);
                debug!(fingerprint = %fingerprint.short(), "Cache hit");
                Ok(Resolved {
                    completion,
                    outcome: CacheOutcome::Hit,
                })
            }
            Admission::Join(rx) => {
                self.inner.stats.joins.fetch_add(1, Ordering::Relaxed);
                self.inner.metrics.record(MetricEvent::DedupJoin);
                debug!(fingerprint = %fingerprint.short(), "Joined in-flight request");
                let completion = flight::wait(rx, deadline).await?;
                Ok(Resolved {
                    completion,
                    outcome: CacheOutcome::Joined,
                })
            }
            Admission::Lead(rx) => {
                self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
                self.inner.metrics.record(MetricEvent::CacheMiss);
                debug!(fingerprint = %fingerprint.short(), "Cache miss; starting upstream call");

                let guard = FlightGuard {
                    inner: Arc::clone(&self.inner),
                    fingerprint,
                    settled: false,
                };
                let future = producer();
                tokio::spawn(async move {
                    let result = future.await;
                    guard.settle(result);
                });

                let completion = flight::wait(rx, deadline).await?;
                Ok(Resolved {
                    completion,
                    outcome: CacheOutcome::Miss,
                })
            }
        }
    }

    /// Drop a cached entry. In-flight requests are unaffected.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.lock_state().store.remove(fingerprint)
    }

    pub fn clear(&self) {
        self.inner.lock_state().store.clear();
    }

    /// Whether a live (non-expired) entry exists. Does not affect recency.
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.inner
            .lock_state()
            .store
            .contains(fingerprint, Instant::now())
    }

    pub fn inspect(&self, fingerprint: &Fingerprint) -> Option<EntrySnapshot> {
        self.inner
            .lock_state()
            .store
            .snapshot(fingerprint, Instant::now())
    }

    pub fn len(&self) -> usize {
        self.inner.lock_state().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_weight(&self) -> u64 {
        self.inner.lock_state().store.total_weight()
    }

    /// Number of upstream calls currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.lock_state().inflight.len()
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, total_weight, in_flight) = {
            let state = self.inner.lock_state();
            (
                state.store.len(),
                state.store.total_weight(),
                state.inflight.len(),
            )
        };
        let s = &self.inner.stats;
        CacheStats {
            hits: s.hits.load(Ordering::Relaxed),
            misses: s.misses.load(Ordering::Relaxed),
            joins: s.joins.load(Ordering::Relaxed),
            insertions: s.insertions.load(Ordering::Relaxed),
            evictions: s.evictions.load(Ordering::Relaxed),
            expirations: s.expirations.load(Ordering::Relaxed),
            failures: s.failures.load(Ordering::Relaxed),
            entries,
            total_weight,
            in_flight,
        }
    }

    /// Remove every expired entry now; returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let removed = self.inner.lock_state().store.sweep(Instant::now());
        if removed > 0 {
            self.inner
                .stats
                .expirations
                .fetch_add(removed as u64, Ordering::Relaxed);
            self.inner
                .metrics
                .record(MetricEvent::Expiry { count: removed });
            debug!(removed, "Swept expired cache entries");
        }
        removed
    }

    /// Sweep expired entries every `period` until the cache is dropped or the
    /// returned handle is aborted. Must be called from within a tokio runtime.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                DedupCache { inner }.sweep_expired();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn key(n: u8) -> Fingerprint {
        Fingerprint::from_bytes([n; 32])
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = DedupCache::new(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        for expected in [CacheOutcome::Miss, CacheOutcome::Hit] {
            let calls = calls.clone();
            let resolved = cache
                .resolve_with_outcome(key(1), far(), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Completion::new("4"))
                })
                .await
                .unwrap();
            assert_eq!(resolved.outcome, expected);
            assert_eq!(resolved.completion.text, "4");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.insertions, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.in_flight, 0);
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let cache = DedupCache::new(CacheConfig::default());
        cache
            .resolve(key(1), far(), || async { Ok(Completion::new("old")) })
            .await
            .unwrap();
        assert!(cache.contains(&key(1)));
        assert!(cache.invalidate(&key(1)));
        assert!(!cache.contains(&key(1)));

        let fresh = cache
            .resolve(key(1), far(), || async { Ok(Completion::new("new")) })
            .await
            .unwrap();
        assert_eq!(fresh.text, "new");
    }

    #[tokio::test]
    async fn test_panicking_producer_releases_waiters() {
        let cache = DedupCache::new(CacheConfig::default());
        let err = cache
            .resolve(key(9), far(), || async {
                if true {
                    panic!("provider exploded");
                }
                Ok(Completion::new("unreachable"))
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("producer task terminated"));
        assert_eq!(cache.in_flight(), 0);
        assert!(cache.is_empty());

        let ok = cache
            .resolve(key(9), far(), || async { Ok(Completion::new("recovered")) })
            .await
            .unwrap();
        assert_eq!(ok.text, "recovered");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_entries() {
        let cache = DedupCache::new(CacheConfig::new().with_ttl(Duration::from_secs(10)));
        cache
            .resolve(key(1), far(), || async { Ok(Completion::new("4")) })
            .await
            .unwrap();
        let handle = cache.spawn_sweeper(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);
        handle.abort();
    }
}
