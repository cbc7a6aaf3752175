//! 上游模型调用模块：带重试与截止时间的补全请求。
//!
//! # Provider Client
//!
//! Turns a prompt (plus conversation context) into a [`Completion`] by calling
//! a remote model. Transient failures are retried under [`RetryPolicy`]; the
//! caller's deadline bounds every attempt and every backoff sleep.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CompletionProvider`] | Trait for upstream model backends |
//! | [`ProviderClient`] | Retry + deadline wrapper around a provider |
//! | [`RetryPolicy`] | Transient-only retry with fixed backoff |
//! | [`HttpProvider`] | OpenAI-compatible `chat/completions` over HTTP |

mod http;
mod policy;

pub use http::HttpProvider;
pub use policy::{Decision, RetryPolicy};

use crate::error::TimeoutStage;
use crate::telemetry::{noop_sink, MetricEvent, MetricsSink};
use crate::types::{Completion, Message, ModelParams};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// One upstream call: the full message list and resolved parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptRequest {
    /// Correlation id, forwarded to the provider when it supports one.
    pub request_id: String,
    pub messages: Vec<Message>,
    pub params: ModelParams,
}

impl PromptRequest {
    pub fn new(messages: Vec<Message>, params: ModelParams) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            messages,
            params,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

/// Upstream model backend.
///
/// Implementations classify their own failures: connection problems and
/// overload (5xx, 429) as [`Error::transient`], everything else as
/// [`Error::permanent`].
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &PromptRequest) -> Result<Completion>;

    fn name(&self) -> &str;
}

/// Retry and deadline handling around a [`CompletionProvider`].
#[derive(Clone)]
pub struct ProviderClient {
    provider: Arc<dyn CompletionProvider>,
    policy: RetryPolicy,
    metrics: Arc<dyn MetricsSink>,
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            policy: RetryPolicy::default(),
            metrics: noop_sink(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Call the provider until it succeeds, fails permanently, runs out of
    /// retries, or `deadline` passes. A retry whose backoff would end past
    /// `deadline` is skipped and the last failure is returned as is.
    pub async fn generate(&self, request: &PromptRequest, deadline: Instant) -> Result<Completion> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let attempt_started = Instant::now();
            info!(
                provider = self.provider.name(),
                request_id = %request.request_id,
                attempt,
                "Calling provider"
            );

            let call = tokio::time::timeout_at(deadline, self.provider.complete(request));
            let result = match call.await {
                Ok(result) => result,
                Err(_) => {
                    self.metrics.record(MetricEvent::ProviderLatency {
                        duration: attempt_started.elapsed(),
                        success: false,
                    });
                    self.metrics
                        .record(MetricEvent::ProviderFailure { transient: false });
                    warn!(
                        provider = self.provider.name(),
                        request_id = %request.request_id,
                        attempt,
                        "Provider call ran past the deadline"
                    );
                    return Err(Error::timeout(TimeoutStage::Provider, started.elapsed()));
                }
            };

            self.metrics.record(MetricEvent::ProviderLatency {
                duration: attempt_started.elapsed(),
                success: result.is_ok(),
            });

            let err = match result {
                Ok(mut completion) => {
                    completion.latency_ms = started.elapsed().as_millis() as u64;
                    debug!(
                        provider = self.provider.name(),
                        request_id = %request.request_id,
                        duration_ms = completion.latency_ms,
                        "Provider call succeeded"
                    );
                    return Ok(completion);
                }
                Err(err) => err,
            };

            match self.policy.decide(&err, attempt) {
                Decision::Retry { delay } => {
                    if Instant::now() + delay >= deadline {
                        self.metrics.record(MetricEvent::ProviderFailure {
                            transient: err.is_transient(),
                        });
                        warn!(
                            provider = self.provider.name(),
                            request_id = %request.request_id,
                            attempt,
                            error = %err,
                            "No time left for a retry"
                        );
                        return Err(err);
                    }
                    attempt += 1;
                    self.metrics.record(MetricEvent::ProviderRetry { attempt });
                    warn!(
                        provider = self.provider.name(),
                        request_id = %request.request_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying provider call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Decision::Fail => {
                    self.metrics.record(MetricEvent::ProviderFailure {
                        transient: err.is_transient(),
                    });
                    warn!(
                        provider = self.provider.name(),
                        request_id = %request.request_id,
                        attempt,
                        error = %err,
                        "Provider call failed"
                    );
                    return Err(err);
                }
            }
        }
    }
}
