use assistant_core::cache::{
    CacheConfig, CacheOutcome, DedupCache, Fingerprint, Fingerprinter, SessionContext, Weigher,
};
use assistant_core::telemetry::InMemoryMetricsSink;
use assistant_core::types::{Completion, ModelParams};
use assistant_core::{Error, ErrorKind, Result, TimeoutStage};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn key(n: u8) -> Fingerprint {
    Fingerprint::from_bytes([n; 32])
}

fn within(d: Duration) -> Instant {
    Instant::now() + d
}

fn producer(
    calls: &Arc<AtomicUsize>,
    text: &'static str,
    delay: Duration,
) -> impl FnOnce() -> BoxFuture<'static, Result<Completion>> {
    let calls = calls.clone();
    move || -> BoxFuture<'static, Result<Completion>> {
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            Ok(Completion::new(text))
        })
    }
}

fn failing(
    calls: &Arc<AtomicUsize>,
    delay: Duration,
) -> impl FnOnce() -> BoxFuture<'static, Result<Completion>> {
    let calls = calls.clone();
    move || -> BoxFuture<'static, Result<Completion>> {
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            Err(Error::permanent("model overloaded", Some(400)))
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_requests_share_one_call() {
    let cache = DedupCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = cache.clone();
        let make = producer(&calls, "4", Duration::from_millis(100));
        handles.push(tokio::spawn(async move {
            cache
                .resolve(key(1), within(Duration::from_secs(5)), make)
                .await
        }));
    }

    let mut answers = Vec::new();
    for handle in handles {
        answers.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(answers.iter().all(|c| c.text == "4"));
    assert!(answers.iter().all(|c| Arc::ptr_eq(c, &answers[0])));

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits + stats.joins, 15);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.entries, 1);
}

#[tokio::test]
async fn test_failure_is_delivered_to_every_waiter_and_not_cached() {
    let cache = DedupCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let waiters = (0..8).map(|_| {
        cache.resolve(
            key(2),
            within(Duration::from_secs(5)),
            failing(&calls, Duration::from_millis(50)),
        )
    });
    let results = futures::future::join_all(waiters).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in &results {
        let err = result.as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderFailure);
        assert!(err.to_string().contains("model overloaded"));
    }
    assert!(!cache.contains(&key(2)));
    assert_eq!(cache.stats().failures, 1);

    let retried = cache
        .resolve(key(2), within(Duration::from_secs(5)), producer(&calls, "ok", Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(retried.text, "ok");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_ttl_boundary() {
    let ttl = Duration::from_secs(30);
    let cache = DedupCache::new(CacheConfig::new().with_ttl(ttl));
    let calls = Arc::new(AtomicUsize::new(0));
    let deadline = || within(Duration::from_secs(5));

    cache
        .resolve(key(3), deadline(), producer(&calls, "4", Duration::ZERO))
        .await
        .unwrap();

    tokio::time::advance(ttl - Duration::from_millis(1)).await;
    let hit = cache
        .resolve_with_outcome(key(3), deadline(), producer(&calls, "4", Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(hit.outcome, CacheOutcome::Hit);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_millis(2)).await;
    let fresh = cache
        .resolve_with_outcome(key(3), deadline(), producer(&calls, "4", Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(fresh.outcome, CacheOutcome::Miss);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.stats().expirations, 1);
}

#[tokio::test]
async fn test_lru_eviction_respects_recency() {
    let metrics = Arc::new(InMemoryMetricsSink::default());
    let cache = DedupCache::with_metrics(
        CacheConfig::new()
            .with_weigher(Weigher::Count)
            .with_max_weight(2),
        metrics.clone(),
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let deadline = || within(Duration::from_secs(5));

    for (n, text) in [(1, "a"), (2, "b")] {
        cache
            .resolve(key(n), deadline(), producer(&calls, text, Duration::ZERO))
            .await
            .unwrap();
    }
    // touch 1 so that 2 is least recently used
    cache
        .resolve(key(1), deadline(), producer(&calls, "a", Duration::ZERO))
        .await
        .unwrap();
    cache
        .resolve(key(3), deadline(), producer(&calls, "c", Duration::ZERO))
        .await
        .unwrap();

    assert!(cache.contains(&key(1)));
    assert!(!cache.contains(&key(2)));
    assert!(cache.contains(&key(3)));
    assert_eq!(cache.total_weight(), 2);
    assert_eq!(cache.stats().evictions, 1);
    assert_eq!(metrics.count("cache.eviction"), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_timeout_does_not_disturb_others() {
    let cache = DedupCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let leader = {
        let cache = cache.clone();
        let make = producer(&calls, "slow answer", Duration::from_millis(500));
        tokio::spawn(async move {
            cache
                .resolve(key(4), within(Duration::from_secs(5)), make)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(cache.in_flight(), 1);

    let err = cache
        .resolve(
            key(4),
            within(Duration::from_millis(50)),
            producer(&calls, "unused", Duration::ZERO),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Timeout {
            stage: TimeoutStage::DedupWait,
            ..
        }
    ));

    let answer = leader.await.unwrap().unwrap();
    assert_eq!(answer.text, "slow answer");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.contains(&key(4)));
}

#[tokio::test(start_paused = true)]
async fn test_detached_leader_still_populates_cache() {
    let cache = DedupCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let err = cache
        .resolve(
            key(5),
            within(Duration::from_millis(20)),
            producer(&calls, "late", Duration::from_millis(200)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(cache.contains(&key(5)));

    let hit = cache
        .resolve_with_outcome(
            key(5),
            within(Duration::from_secs(1)),
            producer(&calls, "unused", Duration::ZERO),
        )
        .await
        .unwrap();
    assert_eq!(hit.outcome, CacheOutcome::Hit);
    assert_eq!(hit.completion.text, "late");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_two_plus_two_is_served_from_cache() {
    let cache = DedupCache::new(CacheConfig::default());
    let fingerprinter = Fingerprinter::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let f = fingerprinter
        .fingerprint(&SessionContext::empty("s1"), "2+2?", &ModelParams::new())
        .unwrap();
    let first = cache
        .resolve_with_outcome(
            f,
            within(Duration::from_secs(5)),
            producer(&calls, "4", Duration::ZERO),
        )
        .await
        .unwrap();
    assert_eq!(first.outcome, CacheOutcome::Miss);
    assert_eq!(first.completion.text, "4");

    let again = fingerprinter
        .fingerprint(&SessionContext::empty("s1"), " 2+2? ", &ModelParams::new())
        .unwrap();
    assert_eq!(again, f);
    let second = cache
        .resolve_with_outcome(
            again,
            within(Duration::from_secs(5)),
            producer(&calls, "5", Duration::ZERO),
        )
        .await
        .unwrap();
    assert_eq!(second.outcome, CacheOutcome::Hit);
    assert!(Arc::ptr_eq(&first.completion, &second.completion));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_oversized_completion_is_returned_but_not_cached() {
    let cache = DedupCache::new(CacheConfig::new().with_max_weight(300));
    let calls = Arc::new(AtomicUsize::new(0));
    let long: &'static str = "x".repeat(1024).leak();

    let answer = cache
        .resolve(key(6), within(Duration::from_secs(5)), producer(&calls, long, Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(answer.text.len(), 1024);
    assert!(cache.is_empty());
    assert_eq!(cache.stats().insertions, 0);
}

#[tokio::test]
async fn test_inspect_reports_weight() {
    let cache = DedupCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    cache
        .resolve(key(7), within(Duration::from_secs(5)), producer(&calls, "four", Duration::ZERO))
        .await
        .unwrap();

    let snapshot = cache.inspect(&key(7)).unwrap();
    assert_eq!(snapshot.weight, 4 + assistant_core::cache::ENTRY_OVERHEAD_BYTES);
    assert!(!snapshot.expired);
    assert!(cache.inspect(&key(8)).is_none());

    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(cache.total_weight(), 0);
}
