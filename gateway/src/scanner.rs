//! Scanner (C3): applies the Detector to each message in a conversation and
//! aggregates the results.

use crate::detector::{DetectionResult, Detector};
use crate::types::{ChatMessage, PiiType, Severity};
use std::collections::BTreeSet;

/// Result of scanning a single message.
#[derive(Debug, Clone)]
pub struct MessageScan {
    pub role: String,
    pub index: usize,
    pub detection_result: DetectionResult,
}

impl MessageScan {
    pub fn has_pii(&self) -> bool {
        self.detection_result.has_pii()
    }
}

/// Aggregated scan result over an entire conversation.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub message_scans: Vec<MessageScan>,
    pub total_detections: usize,
    pub highest_severity: Severity,
    pub pii_types_found: BTreeSet<PiiType>,
}

impl ScanResult {
    pub fn has_pii(&self) -> bool {
        self.total_detections > 0
    }

    pub fn critical_found(&self) -> bool {
        self.highest_severity == Severity::Critical
    }

    /// The type set serialised as stable (alphabetically sorted, since
    /// `PiiType`'s `Ord` follows declaration order — callers that need
    /// lexicographic string order should sort `risk_flags()` themselves, as
    /// the Policy Engine does for its violation/warning lists) strings.
    pub fn risk_flags(&self) -> Vec<String> {
        self.pii_types_found.iter().map(|t| t.as_str().to_string()).collect()
    }
}

/// Which message roles the Scanner inspects. `None` means every role.
#[derive(Debug, Clone, Default)]
pub struct ScannerConfig {
    pub scan_roles: Option<BTreeSet<String>>,
}

/// Scans all messages in a conversation for PII and aggregates the result.
#[derive(Debug, Clone)]
pub struct Scanner {
    detector: Detector,
    config: ScannerConfig,
}

impl Scanner {
    pub fn new(detector: Detector) -> Self {
        Self {
            detector,
            config: ScannerConfig::default(),
        }
    }

    pub fn with_config(detector: Detector, config: ScannerConfig) -> Self {
        Self { detector, config }
    }

    /// Scan every message (subject to `scan_roles`), preserving original
    /// index order. Idempotent: scanning the same conversation twice yields
    /// an equal `ScanResult`.
    pub fn scan(&self, messages: &[ChatMessage]) -> ScanResult {
        let mut message_scans = Vec::with_capacity(messages.len());
        let mut pii_types_found = BTreeSet::new();
        let mut total_detections = 0usize;
        let mut highest_severity = Severity::Low;

        for (index, message) in messages.iter().enumerate() {
            if let Some(roles) = &self.config.scan_roles {
                if !roles.contains(&message.role) {
                    continue;
                }
            }

            let detection_result = self.detector.detect(&message.content);
            if detection_result.has_pii() {
                total_detections += detection_result.detections.len();
                pii_types_found.extend(detection_result.pii_types());
                if detection_result.highest_severity > highest_severity {
                    highest_severity = detection_result.highest_severity;
                }
            }

            message_scans.push(MessageScan {
                role: message.role.clone(),
                index,
                detection_result,
            });
        }

        ScanResult {
            message_scans,
            total_detections,
            highest_severity: if total_detections > 0 { highest_severity } else { Severity::Low },
            pii_types_found,
        }
    }

    /// Short-circuits on the first detected type across the conversation.
    pub fn quick_check(&self, messages: &[ChatMessage]) -> bool {
        messages.iter().any(|m| self.detector.has_any(&m.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn aggregates_across_messages() {
        let scanner = Scanner::new(Detector::new());
        let messages = vec![
            msg("user", "my email is jane@acme.com"),
            msg("assistant", "got it"),
            msg("user", "and my PAN is ABCPD1234E"),
        ];
        let result = scanner.scan(&messages);
        assert_eq!(result.total_detections, 2);
        assert_eq!(result.highest_severity, Severity::Critical);
        assert!(result.pii_types_found.contains(&PiiType::Email));
        assert!(result.pii_types_found.contains(&PiiType::Pan));
    }

    #[test]
    fn scan_is_idempotent() {
        let scanner = Scanner::new(Detector::new());
        let messages = vec![msg("user", "ping 10.0.0.1 please")];
        let a = scanner.scan(&messages);
        let b = scanner.scan(&messages);
        assert_eq!(a.total_detections, b.total_detections);
        assert_eq!(a.pii_types_found, b.pii_types_found);
    }

    #[test]
    fn quick_check_short_circuits() {
        let scanner = Scanner::new(Detector::new());
        assert!(scanner.quick_check(&[msg("user", "ssn 123-45-6789")]));
        assert!(!scanner.quick_check(&[msg("user", "hello world")]));
    }

    #[test]
    fn clean_conversation_has_no_pii() {
        let scanner = Scanner::new(Detector::new());
        let result = scanner.scan(&[msg("user", "Hello, world")]);
        assert!(!result.has_pii());
        assert_eq!(result.highest_severity, Severity::Low);
        assert!(result.risk_flags().is_empty());
    }
}
