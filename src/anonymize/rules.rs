//! Built-in detection rules.

use super::EntityKind;
use crate::{Error, ErrorContext, Result};
use regex::Regex;

pub(crate) type Validator = fn(&str) -> bool;

/// One pattern for one entity kind. Overlapping matches are resolved by
/// `confidence`, then by match length.
#[derive(Debug, Clone)]
pub(crate) struct Rule {
    pub kind: EntityKind,
    pub pattern: Regex,
    pub confidence: f32,
    pub validator: Option<Validator>,
}

impl Rule {
    pub fn new(kind: EntityKind, pattern: &str, confidence: f32) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            Error::configuration_with_context(
                "invalid anonymization pattern",
                ErrorContext::new()
                    .with_field_path(format!("anonymizer.{}", kind.prefix()))
                    .with_details(e.to_string())
                    .with_source("anonymizer"),
            )
        })?;
        Ok(Self {
            kind,
            pattern,
            confidence,
            validator: None,
        })
    }

    fn validated(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn accepts(&self, value: &str) -> bool {
        self.validator.map_or(true, |valid| valid(value))
    }
}

pub(crate) fn default_rules() -> Result<Vec<Rule>> {
    use EntityKind::*;

    Ok(vec![
        Rule::new(Email, r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}", 0.95)?,
        // Austrian, German, then international phone numbers
        Rule::new(Phone, r"(?:\+43|\b0043|\b0)\s*[1-9](?:[\s./-]?\d){6,12}", 0.90)?,
        Rule::new(Phone, r"(?:\+49|\b0049)\s*[1-9](?:[\s./-]?\d){6,12}", 0.90)?,
        Rule::new(
            Phone,
            r"\+[1-9]\d{0,2}[\s.-]?(?:\(\d{1,4}\)[\s.-]?)?\d(?:[\s.-]?\d){5,13}",
            0.85,
        )?,
        // Visa, Mastercard, Amex
        Rule::new(CreditCard, r"\b4\d{3}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b", 0.95)?
            .validated(luhn_valid),
        Rule::new(
            CreditCard,
            r"\b(?:5[1-5]\d{2}|222[1-9]|22[3-9]\d|2[3-6]\d{2}|27[01]\d|2720)[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b",
            0.95,
        )?
        .validated(luhn_valid),
        Rule::new(CreditCard, r"\b3[47]\d{2}[\s-]?\d{6}[\s-]?\d{5}\b", 0.95)?
            .validated(luhn_valid),
        Rule::new(
            Iban,
            r"\b[A-Z]{2}\d{2}(?:\s?[A-Z0-9]{4}){2,7}(?:\s?[A-Z0-9]{1,3})?\b",
            0.95,
        )?
        .validated(iban_valid),
        Rule::new(AustrianUid, r"(?i)\bATU\s?\d{8}\b", 0.95)?,
        Rule::new(AustrianFirmenbuch, r"(?i)\bFN\s?\d{5,6}\s?[a-z]\b", 0.95)?,
        Rule::new(Ssn, r"\b\d{3}[\s-]\d{2}[\s-]\d{4}\b", 0.90)?,
        Rule::new(
            IpAddress,
            r"\b(?:(?:25[0-5]|2[0-4]\d|[01]?\d\d?)\.){3}(?:25[0-5]|2[0-4]\d|[01]?\d\d?)\b",
            0.95,
        )?,
        Rule::new(MacAddress, r"(?i)\b(?:[0-9a-f]{2}[:-]){5}[0-9a-f]{2}\b", 0.95)?,
        Rule::new(Url, r#"https?://[^\s<>"{}|\\^`\[\]]+"#, 0.95)?,
        Rule::new(
            Uuid,
            r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
            0.95,
        )?,
        // 15.03.1985, 1/2/24, then ISO 1985-03-15
        Rule::new(
            Date,
            r"\b(?:0?[1-9]|[12]\d|3[01])[./-](?:0?[1-9]|1[0-2])[./-](?:19|20)?\d{2}\b",
            0.80,
        )?,
        Rule::new(
            Date,
            r"\b(?:19|20)\d{2}-(?:0[1-9]|1[0-2])-(?:0[1-9]|[12]\d|3[01])\b",
            0.85,
        )?,
        Rule::new(
            CurrencyAmount,
            r"(?i)(?:€\s?|\bEUR\s?)\d{1,3}(?:[.,']?\d{3})*(?:[.,]\d{1,2})?|\b\d{1,3}(?:[.,']?\d{3})*(?:[.,]\d{1,2})?\s?(?:€|EUR\b|Euros?\b)",
            0.90,
        )?,
        Rule::new(
            CurrencyAmount,
            r"(?i)(?:\$\s?|\bUSD\s?)\d{1,3}(?:[,']?\d{3})*(?:\.\d{1,2})?|\b\d{1,3}(?:[,']?\d{3})*(?:\.\d{1,2})?\s?(?:\$|USD\b|Dollars?\b)",
            0.90,
        )?,
        Rule::new(
            StreetAddress,
            r"(?i)\b[a-zäöüß]+(?:straße|strasse|gasse|weg|platz|ring|allee)[\s,]+\d{1,4}\s?[a-z]?(?:[/-]\d{1,4})?\b",
            0.85,
        )?,
        Rule::new(
            StreetAddress,
            r"\b\d{1,5}\s+(?:[A-Z][a-z]+\s+){1,3}(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr)\b\.?",
            0.85,
        )?,
        Rule::new(
            HomeRoom,
            r"(?i)\b(?:Wohnzimmer|Schlafzimmer|Kinderzimmer|Badezimmer|Küche|Esszimmer|Arbeitszimmer|Büro|Gästezimmer|Flur|Keller|Dachboden|Garage|Terrasse|Balkon|Garten|Wintergarten)\b",
            0.90,
        )?,
        Rule::new(
            HomeRoom,
            r"(?i)\b(?:living room|bedroom|bathroom|kitchen|dining room|guest room|hallway|basement|attic|garage|garden|balcony|laundry room|home office)\b",
            0.90,
        )?,
    ])
}

/// Luhn checksum over the digits of a card number.
pub(crate) fn luhn_valid(number: &str) -> bool {
    let digits: Vec<u32> = number.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }

    let mut sum = 0;
    let mut double = false;
    for digit in digits.iter().rev() {
        let mut d = *digit;
        if double {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
        double = !double;
    }
    sum % 10 == 0
}

/// ISO 13616 mod-97 check.
pub(crate) fn iban_valid(iban: &str) -> bool {
    let normalized: Vec<char> = iban
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if normalized.len() < 15 || normalized.len() > 34 {
        return false;
    }

    let mut remainder: u32 = 0;
    for c in normalized[4..].iter().chain(&normalized[..4]) {
        remainder = match c {
            '0'..='9' => (remainder * 10 + (*c as u32 - '0' as u32)) % 97,
            'A'..='Z' => (remainder * 100 + (*c as u32 - 'A' as u32 + 10)) % 97,
            _ => return false,
        };
    }
    remainder == 1
}
