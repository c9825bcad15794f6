//! Severity lookup for PII type strings stored in `risk_flags`, mirroring
//! the gateway's Pattern Registry severities. Kept as a single table here
//! rather than re-derived inline at each aggregation call site.

const CRITICAL: &[&str] = &["AADHAAR", "PAN", "CREDIT_CARD", "SSN"];
const HIGH: &[&str] = &["PASSPORT"];
const MEDIUM: &[&str] = &["EMAIL", "PHONE", "DATE_OF_BIRTH"];
const LOW: &[&str] = &["IP_ADDRESS"];

/// Canonical severity bucket for a PII type string. Every bucket here is a
/// cataloged Pattern Registry entry; a type outside all four (e.g. a future
/// recognizer the registry itself falls back on) resolves to `"medium"`,
/// matching the registry's own uncatalogued-type default.
pub fn severity_bucket(pii_type: &str) -> &'static str {
    if CRITICAL.contains(&pii_type) {
        "critical"
    } else if HIGH.contains(&pii_type) {
        "high"
    } else if MEDIUM.contains(&pii_type) {
        "medium"
    } else if LOW.contains(&pii_type) {
        "low"
    } else {
        "medium"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_match_known_types() {
        assert_eq!(severity_bucket("SSN"), "critical");
        assert_eq!(severity_bucket("PASSPORT"), "high");
        assert_eq!(severity_bucket("EMAIL"), "medium");
        assert_eq!(severity_bucket("IP_ADDRESS"), "low");
        assert_eq!(severity_bucket("BANK_ACCOUNT"), "medium");
        assert_eq!(severity_bucket("UNKNOWN_TYPE"), "medium");
    }
}
