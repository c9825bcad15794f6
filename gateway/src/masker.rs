//! Masker (C4): rewrites detected PII spans with `[<TYPE>_REDACTED]`
//! placeholders.

use crate::detector::Detection;
use crate::scanner::ScanResult;
use crate::types::{ChatMessage, PiiType};
use std::collections::HashSet;

/// Stateless text and message rewriter.
#[derive(Debug, Clone, Default)]
pub struct Masker;

impl Masker {
    pub fn new() -> Self {
        Self
    }

    /// Replace each detection's span in `text` with its placeholder.
    ///
    /// When `types_filter` is `Some`, only detections whose type appears in
    /// the filter are rewritten; everything else passes through unchanged.
    /// Replacements apply from the highest `start` to the lowest so earlier
    /// byte offsets stay valid through the rewrite.
    pub fn mask(&self, text: &str, detections: &[Detection], types_filter: Option<&HashSet<PiiType>>) -> String {
        if detections.is_empty() {
            return text.to_string();
        }

        let mut applicable: Vec<&Detection> = detections
            .iter()
            .filter(|d| types_filter.map(|f| f.contains(&d.pii_type)).unwrap_or(true))
            .collect();

        if applicable.is_empty() {
            return text.to_string();
        }

        applicable.sort_by(|a, b| b.start.cmp(&a.start));

        let mut result = text.to_string();
        for detection in applicable {
            result.replace_range(detection.start..detection.end, &detection.placeholder());
        }
        result
    }

    /// Mask every message in a conversation using a prior `ScanResult`,
    /// returning a brand-new sequence — the input conversation is never
    /// mutated. Role and any other fields are preserved unchanged.
    pub fn mask_messages(
        &self,
        messages: &[ChatMessage],
        scan_result: &ScanResult,
        types_filter: Option<&HashSet<PiiType>>,
    ) -> Vec<ChatMessage> {
        messages
            .iter()
            .enumerate()
            .map(|(index, message)| {
                let detections = scan_result
                    .message_scans
                    .iter()
                    .find(|scan| scan.index == index)
                    .map(|scan| scan.detection_result.detections.as_slice())
                    .unwrap_or(&[]);

                ChatMessage {
                    role: message.role.clone(),
                    content: self.mask(&message.content, detections, types_filter),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Detector;
    use crate::scanner::Scanner;

    fn msg(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn masks_single_detection() {
        let masker = Masker::new();
        let detections = Detector::new().detect("Email me at jane@acme.com").detections;
        let masked = masker.mask("Email me at jane@acme.com", &detections, None);
        assert_eq!(masked, "Email me at [EMAIL_REDACTED]");
    }

    #[test]
    fn masks_from_highest_start_first_to_keep_earlier_offsets_valid() {
        let masker = Masker::new();
        let text = "jane@acme.com then ABCPD1234E";
        let detections = Detector::new().detect(text).detections;
        let masked = masker.mask(text, &detections, None);
        assert_eq!(masked, "[EMAIL_REDACTED] then [PAN_REDACTED]");
    }

    #[test]
    fn types_filter_restricts_rewriting() {
        let masker = Masker::new();
        let text = "jane@acme.com then ABCPD1234E";
        let detections = Detector::new().detect(text).detections;
        let mut filter = HashSet::new();
        filter.insert(crate::types::PiiType::Email);
        let masked = masker.mask(text, &detections, Some(&filter));
        assert_eq!(masked, "[EMAIL_REDACTED] then ABCPD1234E");
    }

    #[test]
    fn masking_is_idempotent_after_first_pass() {
        let masker = Masker::new();
        let text = "contact jane@acme.com";
        let first_pass_detections = Detector::new().detect(text).detections;
        let once = masker.mask(text, &first_pass_detections, None);
        let twice = masker.mask(&once, &Detector::new().detect(&once).detections, None);
        assert_eq!(once, twice);
    }

    #[test]
    fn mask_messages_does_not_mutate_input_and_preserves_role() {
        let scanner = Scanner::new(Detector::new());
        let masker = Masker::new();
        let messages = vec![msg("user", "my email is jane@acme.com"), msg("assistant", "ok")];
        let scan_result = scanner.scan(&messages);
        let masked = masker.mask_messages(&messages, &scan_result, None);

        assert_eq!(messages[0].content, "my email is jane@acme.com");
        assert_eq!(masked[0].content, "my email is [EMAIL_REDACTED]");
        assert_eq!(masked[0].role, "user");
        assert_eq!(masked[1].content, "ok");
    }
}
