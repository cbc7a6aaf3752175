//! Runtime configuration.
//!
//! Loaded from YAML (every field optional, falling back to [`Default`]) and
//! then overridden from `ASSISTANT_*` environment variables.

use crate::cache::{CacheConfig, Weigher};
use crate::provider::RetryPolicy;
use crate::types::ModelParams;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upstream endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Bearer token; falls back to `ASSISTANT_API_KEY` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    /// Transport-level timeout of a single HTTP request.
    pub request_timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            default_model: None,
            request_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub cache_max_weight: u64,
    pub cache_weigher: Weigher,
    pub cache_ttl_ms: u64,
    /// Period of the background expiry sweep; 0 disables it.
    pub sweep_interval_ms: u64,
    /// End-to-end budget of one provider call, retries included.
    pub provider_timeout_ms: u64,
    pub provider_max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Number of most recent turns sent as context and hashed into the key.
    pub context_window_size: usize,
    pub max_prompt_chars: usize,
    /// Replace personal data in prompts with placeholders before hashing,
    /// sending and storing them.
    pub anonymize_prompts: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint_salt: Option<String>,
    pub provider: ProviderConfig,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            cache_max_weight: 16 * 1024 * 1024,
            cache_weigher: Weigher::Bytes,
            cache_ttl_ms: 3_600_000,
            sweep_interval_ms: 60_000,
            provider_timeout_ms: 30_000,
            provider_max_retries: 1,
            retry_backoff_ms: 200,
            context_window_size: 6,
            max_prompt_chars: 5_000,
            anonymize_prompts: true,
            system_prompt: None,
            fingerprint_salt: None,
            provider: ProviderConfig::default(),
        }
    }
}

fn parse_error(details: String) -> Error {
    Error::configuration_with_context(
        "failed to parse configuration",
        ErrorContext::new()
            .with_details(details)
            .with_source("config"),
    )
}

fn invalid(field: &str, msg: &str) -> Error {
    Error::configuration_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(format!("config.{}", field))
            .with_source("config"),
    )
}

impl AssistantConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string()))
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::configuration_with_context(
                "failed to read configuration file",
                ErrorContext::new()
                    .with_details(format!("{}: {}", path.display(), e))
                    .with_source("config"),
            )
        })?;
        Self::from_yaml_str(&content)
    }

    /// Apply `ASSISTANT_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any `ASSISTANT_*` key lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(
            lookup: &dyn Fn(&str) -> Option<String>,
            key: &str,
        ) -> Result<Option<T>> {
            match lookup(key) {
                None => Ok(None),
                Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
                    Error::configuration_with_context(
                        "invalid environment override",
                        ErrorContext::new()
                            .with_field_path(key)
                            .with_details(format!("got {:?}", raw))
                            .with_source("config"),
                    )
                }),
            }
        }
        let lookup: &dyn Fn(&str) -> Option<String> = &lookup;

        if let Some(v) = parsed(lookup, "ASSISTANT_CACHE_MAX_WEIGHT")? {
            self.cache_max_weight = v;
        }
        if let Some(raw) = lookup("ASSISTANT_CACHE_WEIGHER") {
            self.cache_weigher = match raw.trim().to_ascii_lowercase().as_str() {
                "bytes" => Weigher::Bytes,
                "count" => Weigher::Count,
                _ => return Err(invalid("cache_weigher", "expected `bytes` or `count`")),
            };
        }
        if let Some(v) = parsed(lookup, "ASSISTANT_CACHE_TTL_MS")? {
            self.cache_ttl_ms = v;
        }
        if let Some(v) = parsed(lookup, "ASSISTANT_SWEEP_INTERVAL_MS")? {
            self.sweep_interval_ms = v;
        }
        if let Some(v) = parsed(lookup, "ASSISTANT_PROVIDER_TIMEOUT_MS")? {
            self.provider_timeout_ms = v;
        }
        if let Some(v) = parsed(lookup, "ASSISTANT_PROVIDER_MAX_RETRIES")? {
            self.provider_max_retries = v;
        }
        if let Some(v) = parsed(lookup, "ASSISTANT_RETRY_BACKOFF_MS")? {
            self.retry_backoff_ms = v;
        }
        if let Some(v) = parsed(lookup, "ASSISTANT_CONTEXT_WINDOW_SIZE")? {
            self.context_window_size = v;
        }
        if let Some(v) = parsed(lookup, "ASSISTANT_MAX_PROMPT_CHARS")? {
            self.max_prompt_chars = v;
        }
        if let Some(v) = parsed(lookup, "ASSISTANT_ANONYMIZE_PROMPTS")? {
            self.anonymize_prompts = v;
        }
        if let Some(v) = lookup("ASSISTANT_SYSTEM_PROMPT") {
            self.system_prompt = Some(v);
        }
        if let Some(v) = lookup("ASSISTANT_FINGERPRINT_SALT") {
            self.fingerprint_salt = Some(v);
        }
        if let Some(v) = lookup("ASSISTANT_PROVIDER_BASE_URL") {
            self.provider.base_url = v;
        }
        if let Some(v) = lookup("ASSISTANT_DEFAULT_MODEL") {
            self.provider.default_model = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_ttl_ms == 0 {
            return Err(invalid("cache_ttl_ms", "cache TTL must be positive"));
        }
        if self.cache_max_weight == 0 {
            return Err(invalid("cache_max_weight", "cache weight bound must be positive"));
        }
        if self.provider_timeout_ms == 0 {
            return Err(invalid("provider_timeout_ms", "provider timeout must be positive"));
        }
        if self.max_prompt_chars == 0 {
            return Err(invalid("max_prompt_chars", "prompt limit must be positive"));
        }
        if self.provider.request_timeout_ms == 0 {
            return Err(invalid(
                "provider.request_timeout_ms",
                "request timeout must be positive",
            ));
        }
        if self.provider.base_url.trim().is_empty() {
            return Err(invalid("provider.base_url", "base_url must not be empty"));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .with_ttl(self.cache_ttl())
            .with_max_weight(self.cache_max_weight)
            .with_weigher(self.cache_weigher)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.provider_max_retries,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }

    /// Parameters every request inherits unless it sets its own.
    pub fn default_params(&self) -> ModelParams {
        ModelParams {
            model: self.provider.default_model.clone(),
            ..ModelParams::default()
        }
    }
}
