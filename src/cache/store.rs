//! Weighted LRU store with TTL.
//!
//! Not synchronized on its own: the dedup core keeps it behind the same mutex
//! as the in-flight map so both are consulted as one structure.

use super::key::Fingerprint;
use crate::types::Completion;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Fixed bookkeeping cost charged to every entry by [`Weigher::Bytes`].
pub const ENTRY_OVERHEAD_BYTES: u64 = 256;

/// How an entry is charged against `cache_max_weight`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weigher {
    /// Completion text bytes plus [`ENTRY_OVERHEAD_BYTES`].
    #[default]
    Bytes,
    /// Every entry weighs 1, so the bound is an entry count.
    Count,
}

impl Weigher {
    pub fn weigh(&self, completion: &Completion) -> u64 {
        match self {
            Weigher::Bytes => completion.text.len() as u64 + ENTRY_OVERHEAD_BYTES,
            Weigher::Count => 1,
        }
    }
}

#[derive(Debug)]
pub(crate) struct CacheEntry {
    completion: Arc<Completion>,
    created_at: Instant,
    last_accessed: Instant,
    weight: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > ttl
    }
}

/// Read-only view of a cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub weight: u64,
    /// Time since the entry was inserted.
    pub age: Duration,
    /// Time since the entry was last served.
    pub idle: Duration,
    pub expired: bool,
}

#[derive(Debug)]
pub(crate) enum Lookup {
    Hit(Arc<Completion>),
    /// Entry was present but past its TTL; it has been removed.
    Expired,
    Absent,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InsertOutcome {
    pub cached: bool,
    pub weight: u64,
    pub evicted: usize,
}

pub(crate) struct CacheStore {
    entries: LruCache<Fingerprint, CacheEntry>,
    ttl: Duration,
    max_weight: u64,
    total_weight: u64,
    weigher: Weigher,
}

impl CacheStore {
    pub fn new(max_weight: u64, ttl: Duration, weigher: Weigher) -> Self {
        Self {
            entries: LruCache::unbounded(),
            ttl,
            max_weight,
            total_weight: 0,
            weigher,
        }
    }

    pub fn lookup(&mut self, key: &Fingerprint, now: Instant) -> Lookup {
        let expired = match self.entries.peek(key) {
            None => return Lookup::Absent,
            Some(entry) => entry.is_expired(now, self.ttl),
        };
        if expired {
            self.remove(key);
            return Lookup::Expired;
        }
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.last_accessed = now;
                Lookup::Hit(Arc::clone(&entry.completion))
            }
            None => Lookup::Absent,
        }
    }

    /// Insert (or replace) an entry, evicting least-recently-used entries
    /// until the total weight fits. An entry heavier than the whole bound is
    /// not cached at all.
    pub fn insert(
        &mut self,
        key: Fingerprint,
        completion: Arc<Completion>,
        now: Instant,
    ) -> InsertOutcome {
        let weight = self.weigher.weigh(&completion);
        if weight > self.max_weight {
            return InsertOutcome {
                cached: false,
                weight,
                evicted: 0,
            };
        }
        self.remove(&key);

        let mut evicted = 0;
        while self.total_weight + weight > self.max_weight {
            match self.entries.pop_lru() {
                Some((_, old)) => {
                    self.total_weight -= old.weight;
                    evicted += 1;
                }
                None => break,
            }
        }

        self.entries.push(
            key,
            CacheEntry {
                completion,
                created_at: now,
                last_accessed: now,
                weight,
            },
        );
        self.total_weight += weight;
        InsertOutcome {
            cached: true,
            weight,
            evicted,
        }
    }

    pub fn remove(&mut self, key: &Fingerprint) -> bool {
        match self.entries.pop(key) {
            Some(old) => {
                self.total_weight -= old.weight;
                true
            }
            None => false,
        }
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let expired: Vec<Fingerprint> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now, self.ttl))
            .map(|(k, _)| *k)
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    /// Live (non-expired) membership test that does not touch recency.
    pub fn contains(&self, key: &Fingerprint, now: Instant) -> bool {
        self.entries
            .peek(key)
            .map(|e| !e.is_expired(now, self.ttl))
            .unwrap_or(false)
    }

    /// Point-in-time view of one entry that does not touch recency.
    pub fn snapshot(&self, key: &Fingerprint, now: Instant) -> Option<EntrySnapshot> {
        self.entries.peek(key).map(|e| EntrySnapshot {
            weight: e.weight,
            age: now.saturating_duration_since(e.created_at),
            idle: now.saturating_duration_since(e.last_accessed),
            expired: e.is_expired(now, self.ttl),
        })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_weight = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }
}
