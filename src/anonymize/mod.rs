//! 匿名化模块：在提示词发往上游之前，用占位符替换其中的敏感信息。
//!
//! # Anonymization
//!
//! Regex-based detection of personal data in a prompt (emails, phone numbers,
//! card numbers, IBANs, Austrian company and tax ids, addresses, smart-home
//! rooms, ...). Each detected value is replaced with a placeholder such as
//! `[EMAIL_1]`; the same value always maps to the same placeholder within one
//! prompt. The provider, the cache key and the session store only ever see
//! the placeholder form, and [`Anonymized::deanonymize`] restores the values
//! in the reply handed back to the caller.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Anonymizer`] | Compiled rule set |
//! | [`Anonymized`] | Placeholder text plus the mapping back to the originals |
//! | [`AnonymizedEntity`] | One replaced value |
//! | [`EntityKind`] | Category of a replaced value |
//!
//! # Example
//!
//! ```rust
//! use assistant_core::anonymize::{Anonymizer, EntityKind};
//!
//! let anonymizer = Anonymizer::new().unwrap();
//! let result = anonymizer.anonymize("Mail max@beispiel.at about it");
//! assert_eq!(result.text(), "Mail [EMAIL_1] about it");
//! assert_eq!(result.entities()[0].kind, EntityKind::Email);
//! assert_eq!(
//!     result.deanonymize("Sent to [EMAIL_1]."),
//!     "Sent to max@beispiel.at."
//! );
//! ```

mod entity;
mod rules;

pub use entity::EntityKind;

use crate::Result;
use rules::{default_rules, Rule};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// One value replaced by a placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymizedEntity {
    pub placeholder: String,
    pub kind: EntityKind,
    pub value: String,
    pub confidence: f32,
}

/// Outcome of [`Anonymizer::anonymize`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Anonymized {
    text: String,
    entities: Vec<AnonymizedEntity>,
}

impl Anonymized {
    /// Input returned as is, with nothing replaced.
    pub fn unchanged(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            entities: Vec::new(),
        }
    }

    /// Text with every detected value replaced.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replaced values in order of first appearance.
    pub fn entities(&self) -> &[AnonymizedEntity] {
        &self.entities
    }

    pub fn into_entities(self) -> Vec<AnonymizedEntity> {
        self.entities
    }

    pub fn has_entities(&self) -> bool {
        !self.entities.is_empty()
    }

    pub fn kinds(&self) -> BTreeSet<EntityKind> {
        self.entities.iter().map(|e| e.kind).collect()
    }

    pub fn original_value(&self, placeholder: &str) -> Option<&str> {
        self.entities
            .iter()
            .find(|e| e.placeholder == placeholder)
            .map(|e| e.value.as_str())
    }

    /// Put the original values back in place of their placeholders.
    pub fn deanonymize(&self, text: &str) -> String {
        let mut result = text.to_string();
        for entity in &self.entities {
            result = result.replace(&entity.placeholder, &entity.value);
        }
        result
    }

    /// Replace the already known values in some other text with their
    /// placeholders, longest value first.
    pub fn apply_to(&self, text: &str) -> String {
        let mut known: Vec<&AnonymizedEntity> = self.entities.iter().collect();
        known.sort_by(|a, b| b.value.len().cmp(&a.value.len()));
        let mut result = text.to_string();
        for entity in known {
            result = result.replace(&entity.value, &entity.placeholder);
        }
        result
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    kind: EntityKind,
    start: usize,
    end: usize,
    confidence: f32,
}

impl Candidate {
    fn overlaps(&self, other: &Candidate) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Compiled set of detection rules. Stateless between calls, so one
/// instance can be shared across tasks.
#[derive(Debug, Clone)]
pub struct Anonymizer {
    rules: Vec<Rule>,
}

impl Anonymizer {
    /// Anonymizer with the built-in rule set.
    pub fn new() -> Result<Self> {
        let rules = default_rules()?;
        debug!(rules = rules.len(), "Anonymizer initialized");
        Ok(Self { rules })
    }

    /// Add a rule reported as [`EntityKind::Custom`].
    pub fn with_rule(mut self, pattern: &str, confidence: f32) -> Result<Self> {
        self.rules.push(Rule::new(EntityKind::Custom, pattern, confidence)?);
        Ok(self)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn anonymize(&self, text: &str) -> Anonymized {
        let mut candidates = Vec::new();
        for rule in &self.rules {
            for m in rule.pattern.find_iter(text) {
                if rule.accepts(m.as_str()) {
                    candidates.push(Candidate {
                        kind: rule.kind,
                        start: m.start(),
                        end: m.end(),
                        confidence: rule.confidence,
                    });
                }
            }
        }
        if candidates.is_empty() {
            return Anonymized::unchanged(text);
        }

        // Most confident first, then longest; ties go to the earlier match.
        candidates.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then((b.end - b.start).cmp(&(a.end - a.start)))
                .then(a.start.cmp(&b.start))
        });
        let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !kept.iter().any(|k| k.overlaps(&candidate)) {
                kept.push(candidate);
            }
        }
        kept.sort_by_key(|c| c.start);

        let mut counters: HashMap<EntityKind, usize> = HashMap::new();
        let mut entities: Vec<AnonymizedEntity> = Vec::new();
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for candidate in kept {
            let value = &text[candidate.start..candidate.end];
            let placeholder = match entities.iter().find(|e| e.value == value) {
                Some(existing) => existing.placeholder.clone(),
                None => {
                    let index = counters.entry(candidate.kind).or_insert(0);
                    *index += 1;
                    let placeholder = candidate.kind.placeholder(*index);
                    entities.push(AnonymizedEntity {
                        placeholder: placeholder.clone(),
                        kind: candidate.kind,
                        value: value.to_string(),
                        confidence: candidate.confidence,
                    });
                    placeholder
                }
            };
            out.push_str(&text[cursor..candidate.start]);
            out.push_str(&placeholder);
            cursor = candidate.end;
        }
        out.push_str(&text[cursor..]);

        debug!(entities = entities.len(), "Anonymized text");
        Anonymized {
            text: out,
            entities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anonymize(text: &str) -> Anonymized {
        Anonymizer::new().unwrap().anonymize(text)
    }

    #[test]
    fn test_austrian_iban() {
        let result = anonymize("Überweise auf AT61 1904 3002 3457 3201 bitte");
        assert!(!result.text().contains("AT61 1904 3002 3457 3201"));
        assert!(result.text().contains("[IBAN_1]"));
        assert_eq!(result.kinds(), BTreeSet::from([EntityKind::Iban]));
    }

    #[test]
    fn test_invalid_iban_is_left_alone() {
        let result = anonymize("Konto AT61 1904 3002 3457 3202");
        assert!(!result.kinds().contains(&EntityKind::Iban));
    }

    #[test]
    fn test_phone_numbers() {
        let result = anonymize("Ruf mich an: +43 664 1234567");
        assert!(!result.text().contains("1234567"));
        assert!(result.text().contains("[PHONE_1]"));
    }

    #[test]
    fn test_austrian_company_ids() {
        let result = anonymize("UID ATU12345678, Firmenbuch FN 123456a");
        assert!(result.text().contains("[AT_UID_1]"));
        assert!(result.text().contains("[AT_FN_1]"));
        assert!(!result.text().contains("ATU12345678"));
    }

    #[test]
    fn test_currency_amounts() {
        let result = anonymize("Ich habe €1.234,56 und 500 Euro ausgegeben, dazu 5 EUR");
        assert!(!result.text().contains("1.234,56"));
        assert!(!result.text().contains("500 Euro"));
        assert!(!result.text().contains("5 EUR"));
        assert_eq!(result.entities().len(), 3);
        assert!(result
            .entities()
            .iter()
            .all(|e| e.kind == EntityKind::CurrencyAmount));
    }

    #[test]
    fn test_credit_card_needs_valid_checksum() {
        let result = anonymize("Karte 4111 1111 1111 1111");
        assert!(result.text().contains("[CC_1]"));

        let result = anonymize("Karte 4111 1111 1111 1112");
        assert!(!result.text().contains("[CC_"));
    }

    #[test]
    fn test_network_identifiers() {
        let result = anonymize("Server 192.168.1.100 at https://intranet.example.at/x");
        assert!(result.text().contains("[IP_1]"));
        assert!(result.text().contains("[URL_1]"));
    }

    #[test]
    fn test_address_date_and_room() {
        let result =
            anonymize("Ich wohne in der Hauptstraße 15a seit 15.03.1985, Licht im Wohnzimmer an");
        assert!(!result.text().contains("Hauptstraße 15a"));
        assert!(!result.text().contains("15.03.1985"));
        assert!(!result.text().contains("Wohnzimmer"));
        assert!(result.text().contains("[ROOM_1]"));
    }

    #[test]
    fn test_repeated_value_reuses_placeholder() {
        let result = anonymize("a@x.at, b@y.at, and again a@x.at");
        assert_eq!(result.text(), "[EMAIL_1], [EMAIL_2], and again [EMAIL_1]");
        assert_eq!(result.entities().len(), 2);
        assert_eq!(result.original_value("[EMAIL_2]"), Some("b@y.at"));
    }

    #[test]
    fn test_deanonymize_restores_original() {
        let text = "Send 199,99 EUR to kunde@firma.at, IBAN AT61 1904 3002 3457 3201";
        let result = anonymize(text);
        assert!(result.entities().len() >= 3);
        assert_eq!(result.deanonymize(result.text()), text);
    }

    #[test]
    fn test_apply_to_reuses_mapping() {
        let result = anonymize("Turn on the kitchen lights");
        assert_eq!(
            result.apply_to("The kitchen lights are on"),
            "The [ROOM_1] lights are on"
        );
    }

    #[test]
    fn test_plain_text_is_unchanged() {
        for text in ["What is 2+2?", "hello", "Explain lifetimes in Rust"] {
            let result = anonymize(text);
            assert_eq!(result.text(), text);
            assert!(!result.has_entities());
        }
    }

    #[test]
    fn test_custom_rule() {
        let anonymizer = Anonymizer::new()
            .unwrap()
            .with_rule(r"\bPRJ-\d{4}\b", 0.9)
            .unwrap();
        let result = anonymizer.anonymize("Status of PRJ-0042?");
        assert_eq!(result.text(), "Status of [CUSTOM_1]?");
    }
}
