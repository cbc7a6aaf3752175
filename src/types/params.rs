//! Model parameters.
//!
//! Every field here changes what the provider may answer, so every field takes
//! part in the request fingerprint (see [`crate::cache::Fingerprinter`]).

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Provider-specific knobs passed through untouched.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ModelParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Fill unset fields from `defaults`. Explicit request values win.
    pub fn merged_with(mut self, defaults: &ModelParams) -> Self {
        if self.model.is_none() {
            self.model = defaults.model.clone();
        }
        if self.temperature.is_none() {
            self.temperature = defaults.temperature;
        }
        if self.max_tokens.is_none() {
            self.max_tokens = defaults.max_tokens;
        }
        if self.top_p.is_none() {
            self.top_p = defaults.top_p;
        }
        if self.stop.is_empty() {
            self.stop = defaults.stop.clone();
        }
        for (k, v) in &defaults.extra {
            self.extra.entry(k.clone()).or_insert_with(|| v.clone());
        }
        self
    }

    /// Reject values no provider accepts, before anything is sent upstream.
    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.temperature {
            if !t.is_finite() || !(0.0..=2.0).contains(&t) {
                return Err(invalid("temperature must be within [0, 2]", "params.temperature", t));
            }
        }
        if let Some(p) = self.top_p {
            if !p.is_finite() || p <= 0.0 || p > 1.0 {
                return Err(invalid("top_p must be within (0, 1]", "params.top_p", p));
            }
        }
        if self.max_tokens == Some(0) {
            return Err(Error::invalid_request_with_context(
                "max_tokens must be positive",
                ErrorContext::new()
                    .with_field_path("params.max_tokens")
                    .with_source("model_params"),
            ));
        }
        if matches!(self.model.as_deref(), Some(m) if m.trim().is_empty()) {
            return Err(Error::invalid_request_with_context(
                "model must not be blank",
                ErrorContext::new()
                    .with_field_path("params.model")
                    .with_source("model_params"),
            ));
        }
        Ok(())
    }

    /// Canonical JSON form used for fingerprinting.
    ///
    /// Floats keep their exact value (shortest round-trip form), so two
    /// requests share a key only if the provider receives the same numbers.
    /// Object keys are sorted by `serde_json::Map`.
    pub(crate) fn canonical(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if let Some(ref m) = self.model {
            map.insert("model".into(), m.trim().into());
        }
        if let Some(t) = self.temperature {
            map.insert("temperature".into(), canonical_float(t));
        }
        if let Some(n) = self.max_tokens {
            map.insert("max_tokens".into(), n.into());
        }
        if let Some(p) = self.top_p {
            map.insert("top_p".into(), canonical_float(p));
        }
        if !self.stop.is_empty() {
            map.insert("stop".into(), self.stop.clone().into());
        }
        if !self.extra.is_empty() {
            let extra: serde_json::Map<String, serde_json::Value> = self
                .extra
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            map.insert("extra".into(), serde_json::Value::Object(extra));
        }
        serde_json::Value::Object(map)
    }
}

/// `-0.0` is folded into `0.0`; non-finite values (rejected by `validate`,
/// but fingerprinting does not require it) fall back to their bit pattern.
fn canonical_float(value: f64) -> serde_json::Value {
    let value = if value == 0.0 { 0.0 } else { value };
    match serde_json::Number::from_f64(value) {
        Some(n) => serde_json::Value::Number(n),
        None => format!("f64:{:016x}", value.to_bits()).into(),
    }
}

fn invalid(msg: &str, field: &str, value: f64) -> Error {
    Error::invalid_request_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_details(format!("got {}", value))
            .with_source("model_params"),
    )
}
