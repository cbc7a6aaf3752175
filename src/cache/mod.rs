//! 去重缓存模块：请求指纹、单飞合并与带 TTL 的加权 LRU 存储。
//!
//! # Dedup Cache Module
//!
//! Guarantees at most one in-flight upstream call per logical request and
//! serves repeats from a bounded, time-limited store.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Fingerprinter`] | Derives a [`Fingerprint`] from session context, prompt and params |
//! | [`DedupCache`] | Single-flight resolve over a weighted LRU store |
//! | [`CacheConfig`] | TTL, weight bound and weigher |
//! | [`CacheStats`] | Hit / miss / join / eviction counters |
//! | [`Weigher`] | How an entry is charged against the weight bound |
//!
//! ## Example
//!
//! ```rust
//! use assistant_core::cache::{CacheConfig, DedupCache, Fingerprinter, SessionContext};
//! use assistant_core::types::{Completion, ModelParams};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> assistant_core::Result<()> {
//! let cache = DedupCache::new(CacheConfig::new().with_ttl(Duration::from_secs(600)));
//! let key = Fingerprinter::new().fingerprint(
//!     &SessionContext::empty("s1"),
//!     "What is 2+2?",
//!     &ModelParams::new(),
//! )?;
//! let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
//! let answer = cache
//!     .resolve(key, deadline, || async { Ok(Completion::new("4")) })
//!     .await?;
//! assert_eq!(answer.text, "4");
//! # Ok(())
//! # }
//! ```
//!
//! ## Expiry
//!
//! An entry older than the TTL is never served. Expired entries are removed
//! lazily on lookup and by the optional sweeper from
//! [`DedupCache::spawn_sweeper`].

mod dedup;
mod flight;
mod key;
mod store;

pub use dedup::{CacheConfig, CacheOutcome, CacheStats, DedupCache, Resolved};
pub use key::{normalize_prompt, Fingerprint, Fingerprinter, SessionContext};
pub use store::{EntrySnapshot, Weigher, ENTRY_OVERHEAD_BYTES};
