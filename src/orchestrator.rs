//! 编排模块：读取会话上下文、计算指纹、经去重缓存调用上游并持久化对话轮次。
//!
//! # Orchestrator
//!
//! The single inbound entry point. One [`Orchestrator::handle`] call:
//!
//! 1. validates the prompt and parameters (no storage or provider access on failure),
//! 2. replaces personal data in the prompt with placeholders,
//! 3. loads the recent-turn window of the session,
//! 4. fingerprints (session, context, placeholder prompt, params),
//! 5. resolves through the [`DedupCache`], calling the provider only on a miss,
//! 6. appends the new turn, best-effort.
//!
//! A completion whose turn could not be stored is still returned, marked
//! [`Persistence::Failed`]. The cache and the session store keep the
//! placeholder form; only the returned [`Reply`] carries the original values.

use crate::anonymize::{Anonymized, AnonymizedEntity, Anonymizer};
use crate::cache::{CacheOutcome, CacheStats, DedupCache, Fingerprinter, SessionContext};
use crate::config::AssistantConfig;
use crate::provider::{CompletionProvider, HttpProvider, PromptRequest, ProviderClient};
use crate::session::{Session, SessionId, SessionStore, Turn};
use crate::telemetry::{noop_sink, MetricsSink};
use crate::types::{Completion, Message, ModelParams};
use crate::{Error, ErrorContext, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Extra time a caller waits beyond the provider deadline, so a provider
/// timeout reaches the caller as such rather than as a dedup-wait timeout.
const WAIT_GRACE: Duration = Duration::from_millis(100);

/// Whether the turn behind a reply was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence {
    Stored,
    /// The completion is valid but the session does not record it.
    Failed { reason: String },
}

/// Result of a handled request.
#[derive(Debug, Clone)]
pub struct Reply {
    pub session_id: SessionId,
    /// Original values restored; the cached entry keeps the placeholders.
    pub completion: Arc<Completion>,
    /// Correlation id of this request; also recorded on the stored turn.
    pub trace_id: String,
    pub cache: CacheOutcome,
    pub persistence: Persistence,
    /// Values replaced by placeholders before the prompt left the process.
    pub anonymized: Vec<AnonymizedEntity>,
}

impl Reply {
    pub fn text(&self) -> &str {
        &self.completion.text
    }

    /// Completion produced but the turn was not persisted.
    pub fn is_degraded(&self) -> bool {
        matches!(self.persistence, Persistence::Failed { .. })
    }
}

pub struct OrchestratorBuilder {
    store: Option<Arc<dyn SessionStore>>,
    provider: Option<Arc<dyn CompletionProvider>>,
    anonymizer: Option<Anonymizer>,
    config: AssistantConfig,
    metrics: Arc<dyn MetricsSink>,
    sweeper: bool,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            provider: None,
            anonymizer: None,
            config: AssistantConfig::default(),
            metrics: noop_sink(),
            sweeper: true,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Upstream backend. Defaults to an [`HttpProvider`] built from `config.provider`.
    pub fn with_provider(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Rule set used when `anonymize_prompts` is on. Defaults to
    /// [`Anonymizer::new`].
    pub fn with_anonymizer(mut self, anonymizer: Anonymizer) -> Self {
        self.anonymizer = Some(anonymizer);
        self
    }

    pub fn with_config(mut self, config: AssistantConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Start the background expiry sweep (default: on, when a tokio runtime is
    /// running and `sweep_interval_ms > 0`).
    pub fn with_sweeper(mut self, enable: bool) -> Self {
        self.sweeper = enable;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        self.config.validate()?;
        let store = self.store.ok_or_else(|| {
            Error::configuration_with_context(
                "a session store is required",
                ErrorContext::new().with_source("orchestrator_builder"),
            )
        })?;
        let provider: Arc<dyn CompletionProvider> = match self.provider {
            Some(p) => p,
            None => Arc::new(HttpProvider::new(&self.config.provider)?),
        };

        let anonymizer = match (self.config.anonymize_prompts, self.anonymizer) {
            (false, _) => None,
            (true, Some(a)) => Some(a),
            (true, None) => Some(Anonymizer::new()?),
        };

        let client = ProviderClient::new(provider)
            .with_policy(self.config.retry_policy())
            .with_metrics(self.metrics.clone());
        let cache = DedupCache::with_metrics(self.config.cache_config(), self.metrics);
        let mut fingerprinter = Fingerprinter::new();
        if let Some(ref salt) = self.config.fingerprint_salt {
            fingerprinter = fingerprinter.with_salt(salt.clone());
        }

        let sweeper = match (self.sweeper, self.config.sweep_interval()) {
            (true, Some(period)) if tokio::runtime::Handle::try_current().is_ok() => {
                debug!(period_ms = period.as_millis() as u64, "Starting cache sweeper");
                Some(cache.spawn_sweeper(period))
            }
            _ => None,
        };

        info!(
            store = store.name(),
            provider = client.provider_name(),
            cache_ttl_ms = self.config.cache_ttl_ms,
            cache_max_weight = self.config.cache_max_weight,
            context_window_size = self.config.context_window_size,
            anonymize = anonymizer.is_some(),
            "Orchestrator ready"
        );

        Ok(Orchestrator {
            default_params: self.config.default_params(),
            store,
            client,
            cache,
            fingerprinter,
            anonymizer,
            config: self.config,
            sweeper: Mutex::new(sweeper),
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Orchestrator {
    store: Arc<dyn SessionStore>,
    client: ProviderClient,
    cache: DedupCache,
    fingerprinter: Fingerprinter,
    anonymizer: Option<Anonymizer>,
    config: AssistantConfig,
    default_params: ModelParams,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Answer `prompt` in the context of an existing session.
    pub async fn handle(
        &self,
        session_id: &SessionId,
        prompt: &str,
        params: ModelParams,
    ) -> Result<Reply> {
        let prompt = self.check_prompt(prompt)?;
        let params = params.merged_with(&self.default_params);
        params.validate()?;
        let anonymized = self.anonymize(prompt);
        let prompt = anonymized.text();

        let turns = self
            .store
            .load_recent_turns(session_id, self.config.context_window_size)
            .await?;
        let context = SessionContext::new(session_id.clone(), turns);
        let fingerprint = self.fingerprinter.fingerprint(&context, prompt, &params)?;

        let trace_id = uuid::Uuid::new_v4().to_string();
        let request = PromptRequest::new(self.messages(&context, prompt), params)
            .with_request_id(trace_id.clone());
        let deadline = Instant::now() + self.config.provider_timeout();
        let client = self.client.clone();

        let resolved = self
            .cache
            .resolve_with_outcome(fingerprint, deadline + WAIT_GRACE, move || async move {
                client.generate(&request, deadline).await
            })
            .await?;

        let turn =
            Turn::new(prompt, resolved.completion.text.clone()).with_trace_id(trace_id.clone());
        let persistence = match self.store.append_turn(session_id, turn).await {
            Ok(()) => Persistence::Stored,
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    trace_id = %trace_id,
                    error = %e,
                    "Failed to persist turn; returning completion without it"
                );
                Persistence::Failed {
                    reason: e.to_string(),
                }
            }
        };

        info!(
            session_id = %session_id,
            trace_id = %trace_id,
            fingerprint = %fingerprint.short(),
            cache = ?resolved.outcome,
            anonymized = anonymized.entities().len(),
            "Request handled"
        );

        let completion = if anonymized.has_entities() {
            let mut restored = (*resolved.completion).clone();
            restored.text = anonymized.deanonymize(&restored.text);
            Arc::new(restored)
        } else {
            resolved.completion
        };

        Ok(Reply {
            session_id: session_id.clone(),
            completion,
            trace_id,
            cache: resolved.outcome,
            persistence,
            anonymized: anonymized.into_entities(),
        })
    }

    /// Like [`handle`](Self::handle), creating a fresh session when none is given.
    pub async fn handle_or_create(
        &self,
        session_id: Option<SessionId>,
        prompt: &str,
        params: ModelParams,
    ) -> Result<Reply> {
        let session_id = match session_id {
            Some(id) => id,
            None => {
                // Reject bad input before creating a session nobody will use.
                self.check_prompt(prompt)?;
                self.start_session().await?
            }
        };
        self.handle(&session_id, prompt, params).await
    }

    pub async fn start_session(&self) -> Result<SessionId> {
        let session = self.store.create_session().await?;
        Ok(session.id)
    }

    /// Session stored under `id`, created empty when it does not exist yet.
    pub async fn open_session(&self, id: &SessionId) -> Result<Session> {
        self.store.open_session(id).await
    }

    /// Full stored history of a session.
    pub async fn history(&self, session_id: &SessionId) -> Result<Session> {
        self.store.load_session(session_id).await
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    /// Stop the background sweeper. In-flight provider calls still finish.
    pub fn shutdown(&self) {
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("Cache sweeper stopped");
        }
    }

    fn check_prompt<'a>(&self, prompt: &'a str) -> Result<&'a str> {
        let trimmed = prompt.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_request_with_context(
                "prompt must not be blank",
                ErrorContext::new()
                    .with_field_path("request.prompt")
                    .with_source("orchestrator"),
            ));
        }
        let chars = trimmed.chars().count();
        if chars > self.config.max_prompt_chars {
            return Err(Error::invalid_request_with_context(
                "prompt is too long",
                ErrorContext::new()
                    .with_field_path("request.prompt")
                    .with_details(format!(
                        "{} characters, limit {}",
                        chars, self.config.max_prompt_chars
                    ))
                    .with_source("orchestrator"),
            ));
        }
        Ok(trimmed)
    }

    fn anonymize(&self, prompt: &str) -> Anonymized {
        match self.anonymizer {
            Some(ref anonymizer) => anonymizer.anonymize(prompt),
            None => Anonymized::unchanged(prompt),
        }
    }

    /// System prompt, then the context turns in order, then the new prompt.
    fn messages(&self, context: &SessionContext, prompt: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(context.turns.len() * 2 + 2);
        if let Some(ref system) = self.config.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        for turn in &context.turns {
            messages.push(Message::user(turn.prompt.clone()));
            messages.push(Message::assistant(turn.completion.clone()));
        }
        messages.push(Message::user(prompt));
        messages
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
