//! 遥测模块：缓存命中、去重合并与上游延迟等指标的输出边界。
//!
//! Metrics boundary.
//!
//! The core emits counters and latency observations as [`MetricEvent`]s; format
//! and transport belong to whatever [`MetricsSink`] the application installs.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`MetricEvent`] | Typed metric observation |
//! | [`MetricsSink`] | Trait for metric destinations |
//! | [`NoopMetricsSink`] | Default no-op sink |
//! | [`InMemoryMetricsSink`] | In-memory sink for testing |
//! | [`TracingMetricsSink`] | Emits events as `tracing` records |
//! | [`CompositeMetricsSink`] | Multi-destination composite sink |

use std::sync::{Arc, RwLock};
use std::time::Duration;

/// A single observation emitted by the core.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    CacheHit,
    CacheMiss,
    /// A caller joined an already in-flight request instead of calling upstream.
    DedupJoin,
    CacheInsert { weight: u64 },
    Eviction { count: usize },
    Expiry { count: usize },
    ProviderLatency { duration: Duration, success: bool },
    ProviderRetry { attempt: u32 },
    ProviderFailure { transient: bool },
}

impl MetricEvent {
    /// Stable metric name, suitable as a counter/histogram key.
    pub fn name(&self) -> &'static str {
        match self {
            MetricEvent::CacheHit => "cache.hit",
            MetricEvent::CacheMiss => "cache.miss",
            MetricEvent::DedupJoin => "dedup.join",
            MetricEvent::CacheInsert { .. } => "cache.insert",
            MetricEvent::Eviction { .. } => "cache.eviction",
            MetricEvent::Expiry { .. } => "cache.expiry",
            MetricEvent::ProviderLatency { .. } => "provider.latency",
            MetricEvent::ProviderRetry { .. } => "provider.retry",
            MetricEvent::ProviderFailure { .. } => "provider.failure",
        }
    }
}

/// Destination for metric events. Called on hot paths: implementations must
/// not block.
pub trait MetricsSink: Send + Sync {
    fn record(&self, event: MetricEvent);
}

pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record(&self, _event: MetricEvent) {}
}

pub fn noop_sink() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetricsSink)
}

/// In-memory sink for testing.
pub struct InMemoryMetricsSink {
    events: RwLock<Vec<MetricEvent>>,
    max_events: usize,
}

impl InMemoryMetricsSink {
    pub fn new(max: usize) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            max_events: max,
        }
    }
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
    /// Number of recorded events with the given [`MetricEvent::name`].
    pub fn count(&self, name: &str) -> usize {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.name() == name)
            .count()
    }
    pub fn clear(&self) {
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|e| e.into_inner()).len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryMetricsSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn record(&self, event: MetricEvent) {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        events.push(event);
        if events.len() > self.max_events {
            events.remove(0);
        }
    }
}

/// Emits every event as a `tracing` record on the `assistant_core::metrics` target.
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record(&self, event: MetricEvent) {
        match event {
            MetricEvent::ProviderLatency { duration, success } => tracing::debug!(
                target: "assistant_core::metrics",
                metric = event.name(),
                duration_ms = duration.as_millis() as u64,
                success
            ),
            MetricEvent::CacheInsert { weight } => tracing::debug!(
                target: "assistant_core::metrics",
                metric = event.name(),
                weight
            ),
            MetricEvent::Eviction { count } | MetricEvent::Expiry { count } => tracing::debug!(
                target: "assistant_core::metrics",
                metric = event.name(),
                count
            ),
            MetricEvent::ProviderRetry { attempt } => tracing::debug!(
                target: "assistant_core::metrics",
                metric = event.name(),
                attempt
            ),
            MetricEvent::ProviderFailure { transient } => tracing::debug!(
                target: "assistant_core::metrics",
                metric = event.name(),
                transient
            ),
            MetricEvent::CacheHit | MetricEvent::CacheMiss | MetricEvent::DedupJoin => {
                tracing::trace!(target: "assistant_core::metrics", metric = event.name())
            }
        }
    }
}

/// Composite sink for multiple destinations.
pub struct CompositeMetricsSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl CompositeMetricsSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }
    pub fn add_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl Default for CompositeMetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for CompositeMetricsSink {
    fn record(&self, event: MetricEvent) {
        for sink in &self.sinks {
            sink.record(event.clone());
        }
    }
}
