use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a sensitive value found in a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Email,
    Phone,
    CreditCard,
    Iban,
    /// Austrian VAT id (`ATU` + 8 digits).
    AustrianUid,
    /// Austrian company register number (`FN 123456a`).
    AustrianFirmenbuch,
    Ssn,
    IpAddress,
    MacAddress,
    Url,
    Uuid,
    Date,
    CurrencyAmount,
    StreetAddress,
    HomeRoom,
    /// Rules registered through [`Anonymizer::with_rule`](super::Anonymizer::with_rule).
    Custom,
}

impl EntityKind {
    /// Tag used inside placeholders.
    pub fn prefix(&self) -> &'static str {
        match self {
            EntityKind::Email => "EMAIL",
            EntityKind::Phone => "PHONE",
            EntityKind::CreditCard => "CC",
            EntityKind::Iban => "IBAN",
            EntityKind::AustrianUid => "AT_UID",
            EntityKind::AustrianFirmenbuch => "AT_FN",
            EntityKind::Ssn => "US_SSN",
            EntityKind::IpAddress => "IP",
            EntityKind::MacAddress => "MAC",
            EntityKind::Url => "URL",
            EntityKind::Uuid => "UUID",
            EntityKind::Date => "DATE",
            EntityKind::CurrencyAmount => "AMOUNT",
            EntityKind::StreetAddress => "STREET",
            EntityKind::HomeRoom => "ROOM",
            EntityKind::Custom => "CUSTOM",
        }
    }

    /// `[PREFIX_n]`, with `n` counting from 1 per kind.
    pub fn placeholder(&self, index: usize) -> String {
        format!("[{}_{}]", self.prefix(), index)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}
