use super::{CompletionProvider, PromptRequest};
use crate::config::ProviderConfig;
use crate::types::{Completion, Usage};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use url::Url;

/// Environment fallback for the bearer token when the config carries none.
pub const API_KEY_ENV: &str = "ASSISTANT_API_KEY";

/// OpenAI-compatible `POST {base_url}/chat/completions` client.
pub struct HttpProvider {
    client: reqwest::Client,
    endpoint: Url,
    default_model: Option<String>,
    api_key: Option<String>,
}

impl HttpProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let endpoint = Self::endpoint(&config.base_url)?;
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| env::var(API_KEY_ENV).ok());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .pool_max_idle_per_host(
                env::var("ASSISTANT_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| {
                Error::configuration_with_context(
                    "failed to build HTTP client",
                    ErrorContext::new()
                        .with_details(e.to_string())
                        .with_source("http_provider"),
                )
            })?;

        Ok(Self {
            client,
            endpoint,
            default_model: config.default_model.clone(),
            api_key,
        })
    }

    fn endpoint(base_url: &str) -> Result<Url> {
        let invalid = |details: String| {
            Error::configuration_with_context(
                "invalid provider base_url",
                ErrorContext::new()
                    .with_field_path("provider.base_url")
                    .with_details(details)
                    .with_source("http_provider"),
            )
        };
        // Url::join replaces the last path segment unless the base ends in '/'.
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base).map_err(|e| invalid(format!("{}: {}", base_url, e)))?;
        base.join("chat/completions")
            .map_err(|e| invalid(format!("{}: {}", base_url, e)))
    }

    pub fn endpoint_url(&self) -> &Url {
        &self.endpoint
    }

    fn body(&self, request: &PromptRequest) -> serde_json::Value {
        let params = &request.params;
        let mut body = serde_json::Map::new();
        if let Some(model) = params.model.as_ref().or(self.default_model.as_ref()) {
            body.insert("model".into(), model.clone().into());
        }
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        body.insert("messages".into(), messages.into());
        if let Some(t) = params.temperature {
            body.insert("temperature".into(), t.into());
        }
        if let Some(n) = params.max_tokens {
            body.insert("max_tokens".into(), n.into());
        }
        if let Some(p) = params.top_p {
            body.insert("top_p".into(), p.into());
        }
        if !params.stop.is_empty() {
            body.insert("stop".into(), params.stop.clone().into());
        }
        for (k, v) in &params.extra {
            body.entry(k.clone()).or_insert_with(|| v.clone());
        }
        serde_json::Value::Object(body)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Pull `error.message` out of an OpenAI-style error body, else a prefix of the raw body.
fn error_message(body: &[u8]) -> String {
    if let Ok(v) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(msg) = v.pointer("/error/message").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
    }
    let text = String::from_utf8_lossy(body);
    text.chars().take(200).collect()
}

fn status_is_transient(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl CompletionProvider for HttpProvider {
    async fn complete(&self, request: &PromptRequest) -> Result<Completion> {
        let mut req = self
            .client
            .post(self.endpoint.clone())
            .header("x-request-id", request.request_id.as_str())
            .json(&self.body(request));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| Error::transient(format!("request failed: {}", e), None))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            Error::transient(
                format!("failed to read response body: {}", e),
                Some(status.as_u16()),
            )
        })?;

        if !status.is_success() {
            let message = error_message(&body);
            return Err(if status_is_transient(status) {
                Error::transient(message, Some(status.as_u16()))
            } else {
                Error::permanent(message, Some(status.as_u16()))
            });
        }

        let parsed: ChatResponse = serde_json::from_slice(&body).map_err(|e| {
            Error::permanent(format!("malformed completion response: {}", e), Some(status.as_u16()))
        })?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            Error::permanent("completion response has no choices", Some(status.as_u16()))
        })?;

        let mut completion = Completion::new(choice.message.content.unwrap_or_default())
            .with_usage(parsed.usage.unwrap_or_default());
        completion.model = parsed.model;
        completion.finish_reason = choice.finish_reason;
        Ok(completion)
    }

    fn name(&self) -> &str {
        "http"
    }
}
