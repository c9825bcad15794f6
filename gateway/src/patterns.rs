//! Pattern Registry (C1).
//!
//! Recognisers are compiled once, at first access, and never touched again —
//! the registry is read-only for the lifetime of the process. Each
//! recogniser is anchored by a word boundary or its own format delimiters so
//! that substrings of longer tokens don't false-positive in the common case.

use crate::types::{PiiType, Severity};
use once_cell::sync::Lazy;
use regex::Regex;

/// A compiled recogniser: the PII type it detects, its severity, a human
/// description, and the regex used to find it.
pub struct Recognizer {
    pub pii_type: PiiType,
    pub severity: Severity,
    pub description: &'static str,
    pub pattern: Regex,
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern:?}: {e}"))
}

fn build_registry() -> Vec<Recognizer> {
    vec![
        Recognizer {
            pii_type: PiiType::Email,
            severity: Severity::Medium,
            description: "Email address",
            pattern: compile(r"(?i)\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
        },
        Recognizer {
            pii_type: PiiType::Phone,
            severity: Severity::Medium,
            description: "Phone number (US/India formats)",
            pattern: compile(
                r"(?i)(?:\+?1[-.\s]?|\+?91[-.\s]?)?(?:\(\d{3}\)|\d{3})[-.\s]?\d{3}[-.\s]?\d{4}\b|\b\d{5}[-.\s]\d{5}\b",
            ),
        },
        Recognizer {
            pii_type: PiiType::Pan,
            severity: Severity::Critical,
            description: "India PAN Card number",
            pattern: compile(r"(?i)\b[A-Z]{3}[ABCFGHLJPTK][A-Z]\d{4}[A-Z]\b"),
        },
        Recognizer {
            pii_type: PiiType::Aadhaar,
            severity: Severity::Critical,
            description: "India Aadhaar number (12 digits)",
            pattern: compile(r"\b\d{4}[-.\s]?\d{4}[-.\s]?\d{4}\b"),
        },
        Recognizer {
            pii_type: PiiType::CreditCard,
            severity: Severity::Critical,
            description: "Credit card number (Visa, Mastercard, Amex, Discover)",
            pattern: compile(
                r"\b(?:4\d{3}[-.\s]?\d{4}[-.\s]?\d{4}[-.\s]?\d{4}|5[1-5]\d{2}[-.\s]?\d{4}[-.\s]?\d{4}[-.\s]?\d{4}|3[47]\d{2}[-.\s]?\d{6}[-.\s]?\d{5}|6(?:011|5\d{2})[-.\s]?\d{4}[-.\s]?\d{4}[-.\s]?\d{4})\b",
            ),
        },
        Recognizer {
            pii_type: PiiType::Ssn,
            severity: Severity::Critical,
            description: "US Social Security Number",
            pattern: compile(r"\b\d{3}[-.\s]\d{2}[-.\s]\d{4}\b"),
        },
        Recognizer {
            pii_type: PiiType::IpAddress,
            severity: Severity::Low,
            description: "IPv4 address",
            pattern: compile(
                r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b",
            ),
        },
        Recognizer {
            pii_type: PiiType::Passport,
            severity: Severity::High,
            description: "Passport number",
            pattern: compile(r"(?i)\b[A-Z]{1,2}\d{6,8}\b"),
        },
        Recognizer {
            pii_type: PiiType::DateOfBirth,
            severity: Severity::Medium,
            description: "Date of birth",
            pattern: compile(r"\b(?:\d{1,2}[-/]\d{1,2}[-/]\d{2,4}|\d{4}[-/]\d{1,2}[-/]\d{1,2})\b"),
        },
        Recognizer {
            pii_type: PiiType::BankAccount,
            severity: Severity::default_for_uncatalogued(),
            description: "Generic bank account number",
            pattern: compile(r"\b\d{8,18}\b"),
        },
    ]
}

/// The process-wide, read-only set of compiled recognisers.
pub static REGISTRY: Lazy<Vec<Recognizer>> = Lazy::new(build_registry);

/// Look up the canonical severity for a type, falling back to
/// [`Severity::default_for_uncatalogued`] if the registry has no recogniser
/// for it (shouldn't happen for the closed `PiiType` enum, but keeps this
/// function total rather than panicking).
pub fn severity_for(pii_type: PiiType) -> Severity {
    REGISTRY
        .iter()
        .find(|r| r.pii_type == pii_type)
        .map(|r| r.severity)
        .unwrap_or_else(Severity::default_for_uncatalogued)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_pii_type() {
        for t in PiiType::ALL {
            assert!(REGISTRY.iter().any(|r| r.pii_type == t), "missing recognizer for {t}");
        }
    }

    #[test]
    fn pan_requires_constrained_fourth_letter() {
        let r = REGISTRY.iter().find(|r| r.pii_type == PiiType::Pan).unwrap();
        assert!(r.pattern.is_match("ABCPD1234E"));
        assert!(!r.pattern.is_match("ABCXD1234E"));
    }

    #[test]
    fn ip_address_respects_octet_range() {
        let r = REGISTRY.iter().find(|r| r.pii_type == PiiType::IpAddress).unwrap();
        assert!(r.pattern.is_match("192.168.1.1"));
        assert!(!r.pattern.is_match("999.999.999.999"));
    }
}
