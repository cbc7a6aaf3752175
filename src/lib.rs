//! # assistant-core
//!
//! 对话式助手后端的请求去重与响应缓存核心。
//!
//! Request deduplication and response cache core for an LLM-backed
//! conversational assistant.
//!
//! ## Overview
//!
//! Requests arrive bound to a conversation session. The core loads the recent
//! turns of that session, derives a fingerprint of the logical request, and
//! answers it from a bounded in-memory cache when it can. Concurrent identical
//! requests share a single upstream call; failures are never cached. Personal
//! data in the prompt is replaced with placeholders before it is hashed, sent
//! upstream or stored.
//!
//! ## Core Guarantees
//!
//! - **Single-flight**: at most one provider call per fingerprint at a time
//! - **Bounded**: total cached weight never exceeds the configured bound; LRU eviction
//! - **Fresh**: entries older than the TTL are never served
//! - **Non-blocking**: no lock is held across a provider call or a storage call
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use assistant_core::{AssistantConfig, Orchestrator};
//! use assistant_core::session::{InMemorySessionStore, SessionId};
//! use assistant_core::types::ModelParams;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> assistant_core::Result<()> {
//!     let orchestrator = Orchestrator::builder()
//!         .with_store(Arc::new(InMemorySessionStore::with_sessions(["s1"])))
//!         .with_config(AssistantConfig::default())
//!         .build()?;
//!
//!     let reply = orchestrator
//!         .handle(&SessionId::new("s1"), "2+2?", ModelParams::new())
//!         .await?;
//!     println!("{} ({:?})", reply.text(), reply.cache);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`orchestrator`] | Inbound entry point: context, fingerprint, cache, persistence |
//! | [`anonymize`] | Placeholder substitution of personal data in prompts |
//! | [`cache`] | Fingerprinting, single-flight dedup and the weighted LRU/TTL store |
//! | [`provider`] | Upstream model calls with retry and deadline |
//! | [`session`] | Session store boundary and in-memory adapter |
//! | [`config`] | YAML + environment configuration |
//! | [`telemetry`] | Metrics boundary |
//! | [`types`] | Messages, model parameters, completions |

pub mod anonymize;
pub mod cache;
pub mod config;
pub mod orchestrator;
pub mod provider;
pub mod session;
pub mod telemetry;
pub mod types;

pub use anonymize::{Anonymized, AnonymizedEntity, Anonymizer, EntityKind};
pub use cache::{CacheOutcome, CacheStats, DedupCache, Fingerprint, Fingerprinter};
pub use config::{AssistantConfig, ProviderConfig};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, Persistence, Reply};
pub use provider::{CompletionProvider, HttpProvider, PromptRequest, ProviderClient, RetryPolicy};
pub use session::{InMemorySessionStore, Session, SessionId, SessionStore, Turn};
pub use types::{Completion, Message, MessageRole, ModelParams, Usage};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, ErrorKind, TimeoutStage};
