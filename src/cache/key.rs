//! Request fingerprinting.

use crate::session::{SessionId, Turn};
use crate::types::ModelParams;
use crate::{Error, ErrorContext, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Fixed-width cache key for one logical request.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> String {
        self.0[..6].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

/// The slice of a session that a request is answered against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: SessionId,
    /// Recent turns, oldest first.
    pub turns: Vec<Turn>,
}

impl SessionContext {
    pub fn new(session_id: SessionId, turns: Vec<Turn>) -> Self {
        Self { session_id, turns }
    }

    pub fn empty(session_id: impl Into<SessionId>) -> Self {
        Self::new(session_id.into(), Vec::new())
    }
}

/// Trim and collapse every whitespace run to a single space.
pub fn normalize_prompt(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Derives [`Fingerprint`]s from normalized requests.
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    salt: Option<String>,
}

impl Fingerprinter {
    pub fn new() -> Self {
        Self { salt: None }
    }

    /// Mix a deployment-wide salt into every key; changing it orphans all
    /// previously cached entries.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn fingerprint(
        &self,
        context: &SessionContext,
        prompt: &str,
        params: &ModelParams,
    ) -> Result<Fingerprint> {
        if context.session_id.as_str().trim().is_empty() {
            return Err(Error::invalid_request_with_context(
                "session id must not be empty",
                ErrorContext::new()
                    .with_field_path("request.session_id")
                    .with_source("fingerprinter"),
            ));
        }
        let prompt = normalize_prompt(prompt);
        if prompt.is_empty() {
            return Err(Error::invalid_request_with_context(
                "prompt must not be blank",
                ErrorContext::new()
                    .with_field_path("request.prompt")
                    .with_source("fingerprinter"),
            ));
        }

        let history: Vec<[String; 2]> = context
            .turns
            .iter()
            .map(|t| [normalize_prompt(&t.prompt), t.completion.clone()])
            .collect();

        // JSON quoting keeps field boundaries unambiguous.
        let mut parts: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
        parts.insert("session", context.session_id.as_str().into());
        parts.insert("context", serde_json::json!(history));
        parts.insert("prompt", prompt.into());
        parts.insert("params", params.canonical());
        if let Some(ref s) = self.salt {
            parts.insert("salt", s.as_str().into());
        }
        let canonical = serde_json::to_vec(&parts).map_err(|e| {
            Error::invalid_request_with_context(
                "request cannot be canonicalized",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("fingerprinter"),
            )
        })?;

        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(Fingerprint(hasher.finalize().into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn fp(ctx: &SessionContext, prompt: &str, params: &ModelParams) -> Fingerprint {
        Fingerprinter::new().fingerprint(ctx, prompt, params).unwrap()
    }

    #[test]
    fn test_formatting_does_not_change_fingerprint() {
        let ctx = SessionContext::empty("s1");
        let params = ModelParams::new().with_temperature(0.7);
        let a = fp(&ctx, "What is   2+2?", &params);
        let b = fp(&ctx, "  What is 2+2?\n", &params);
        let c = fp(&ctx, "What\tis 2+2?", &params);
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.to_hex().len(), 64);
    }

    #[test]
    fn test_each_field_changes_fingerprint() {
        let ctx = SessionContext::empty("s1");
        let params = ModelParams::new().with_model("gpt-4o-mini");
        let base = fp(&ctx, "2+2?", &params);

        assert_ne!(base, fp(&SessionContext::empty("s2"), "2+2?", &params));
        assert_ne!(base, fp(&ctx, "2+3?", &params));
        assert_ne!(base, fp(&ctx, "2+2?", &params.clone().with_temperature(0.1)));
        assert_ne!(base, fp(&ctx, "2+2?", &ModelParams::new().with_model("gpt-4o")));

        let with_history =
            SessionContext::new(SessionId::new("s1"), vec![Turn::new("hi", "hello")]);
        assert_ne!(base, fp(&with_history, "2+2?", &params));
    }

    #[test]
    fn test_nearby_temperatures_get_distinct_fingerprints() {
        let ctx = SessionContext::empty("s1");
        let a = fp(&ctx, "2+2?", &ModelParams::new().with_temperature(0.7));
        let b = fp(&ctx, "2+2?", &ModelParams::new().with_temperature(0.70004));
        assert_ne!(a, b);
    }

    #[test]
    fn test_case_is_preserved() {
        let ctx = SessionContext::empty("s1");
        let params = ModelParams::new();
        assert_ne!(fp(&ctx, "Rust", &params), fp(&ctx, "rust", &params));
    }

    #[test]
    fn test_field_boundaries_do_not_collide() {
        let params = ModelParams::new();
        let a = SessionContext::new(SessionId::new("s"), vec![Turn::new("ab", "c")]);
        let b = SessionContext::new(SessionId::new("s"), vec![Turn::new("a", "bc")]);
        assert_ne!(fp(&a, "x", &params), fp(&b, "x", &params));
    }

    #[test]
    fn test_history_timestamps_are_ignored() {
        let params = ModelParams::new();
        let mut t1 = Turn::new("hi", "hello");
        let mut t2 = t1.clone();
        t1.timestamp_ms = 1;
        t2.timestamp_ms = 2;
        t2.trace_id = Some("trace".into());
        let a = SessionContext::new(SessionId::new("s"), vec![t1]);
        let b = SessionContext::new(SessionId::new("s"), vec![t2]);
        assert_eq!(fp(&a, "x", &params), fp(&b, "x", &params));
    }

    #[test]
    fn test_salt_changes_fingerprint() {
        let ctx = SessionContext::empty("s1");
        let params = ModelParams::new();
        let salted = Fingerprinter::new()
            .with_salt("v2")
            .fingerprint(&ctx, "2+2?", &params)
            .unwrap();
        assert_ne!(salted, fp(&ctx, "2+2?", &params));
    }

    #[test]
    fn test_blank_input_is_rejected() {
        let f = Fingerprinter::new();
        let err = f
            .fingerprint(&SessionContext::empty("s1"), " \n\t", &ModelParams::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        let err = f
            .fingerprint(&SessionContext::empty(""), "hi", &ModelParams::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }
}
