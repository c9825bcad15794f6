//! Shared domain types for the enforcement pipeline.
//!
//! These are the types every other module in this crate builds on: the
//! closed `PiiType` enumeration, the totally-ordered `Severity` scale, and
//! the chat message shape the orchestrator scans.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed enumeration of PII categories the Pattern Registry recognises.
///
/// Extensible by adding a recogniser to `patterns.rs`, not by changing the
/// policy evaluation logic — the engine only ever deals in type strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PiiType {
    Email,
    Phone,
    Pan,
    Aadhaar,
    CreditCard,
    Ssn,
    IpAddress,
    Passport,
    DateOfBirth,
    BankAccount,
}

impl PiiType {
    /// All recognised types, in the order the Pattern Registry declares them.
    pub const ALL: [PiiType; 10] = [
        PiiType::Email,
        PiiType::Phone,
        PiiType::Pan,
        PiiType::Aadhaar,
        PiiType::CreditCard,
        PiiType::Ssn,
        PiiType::IpAddress,
        PiiType::Passport,
        PiiType::DateOfBirth,
        PiiType::BankAccount,
    ];

    /// Stable string form used in risk flags, policy rule sets, and wire
    /// payloads. Parseable back via `FromStr`.
    pub fn as_str(&self) -> &'static str {
        match self {
            PiiType::Email => "EMAIL",
            PiiType::Phone => "PHONE",
            PiiType::Pan => "PAN",
            PiiType::Aadhaar => "AADHAAR",
            PiiType::CreditCard => "CREDIT_CARD",
            PiiType::Ssn => "SSN",
            PiiType::IpAddress => "IP_ADDRESS",
            PiiType::Passport => "PASSPORT",
            PiiType::DateOfBirth => "DATE_OF_BIRTH",
            PiiType::BankAccount => "BANK_ACCOUNT",
        }
    }
}

impl fmt::Display for PiiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PiiType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EMAIL" => Ok(PiiType::Email),
            "PHONE" => Ok(PiiType::Phone),
            "PAN" => Ok(PiiType::Pan),
            "AADHAAR" => Ok(PiiType::Aadhaar),
            "CREDIT_CARD" => Ok(PiiType::CreditCard),
            "SSN" => Ok(PiiType::Ssn),
            "IP_ADDRESS" => Ok(PiiType::IpAddress),
            "PASSPORT" => Ok(PiiType::Passport),
            "DATE_OF_BIRTH" => Ok(PiiType::DateOfBirth),
            "BANK_ACCOUNT" => Ok(PiiType::BankAccount),
            _ => Err(()),
        }
    }
}

/// Totally ordered severity scale: LOW < MEDIUM < HIGH < CRITICAL.
///
/// Declaration order doubles as rank order via `derive(PartialOrd, Ord)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Low
    }
}

impl Severity {
    /// Canonical severity for a type not covered by the Pattern Registry.
    ///
    /// The registry is the single source of truth for severities (§9 of the
    /// spec flags that the original duplicates this as an inline list in the
    /// violations summary — we don't repeat that mistake). Types that fall
    /// outside the registry's table default to MEDIUM.
    pub fn default_for_uncatalogued() -> Severity {
        Severity::Medium
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in a conversation, role plus content.
///
/// Mirrors the OpenAI-compatible `{role, content}` shape; unknown sibling
/// fields on the wire payload are preserved by the orchestrator, not by this
/// type, which only carries what scanning/masking need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn pii_type_round_trips_through_str() {
        for t in PiiType::ALL {
            let s = t.as_str();
            let parsed: PiiType = s.parse().unwrap();
            assert_eq!(parsed, t);
        }
    }
}
