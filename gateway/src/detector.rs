//! Detector (C2): runs the Pattern Registry over a string and returns a
//! non-overlapping, position-sorted set of detections.

use crate::patterns::REGISTRY;
use crate::types::{PiiType, Severity};
use std::collections::HashSet;

/// A single PII match: type, byte range into the scanned string, severity,
/// and the placeholder it would be replaced with if masked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub pii_type: PiiType,
    pub start: usize,
    pub end: usize,
    pub severity: Severity,
}

impl Detection {
    /// `[<TYPE>_REDACTED]`, the mask the Masker writes in place of this span.
    pub fn placeholder(&self) -> String {
        format!("[{}_REDACTED]", self.pii_type.as_str())
    }
}

/// Aggregate result of running the Detector over one string.
#[derive(Debug, Clone, Default)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub highest_severity: Severity,
}

impl DetectionResult {
    pub fn has_pii(&self) -> bool {
        !self.detections.is_empty()
    }

    pub fn pii_types(&self) -> HashSet<PiiType> {
        self.detections.iter().map(|d| d.pii_type).collect()
    }
}

/// Set of PII types a Detector instance should skip entirely.
#[derive(Debug, Clone, Default)]
pub struct DetectorConfig {
    pub disabled_types: HashSet<PiiType>,
}

/// Scans text for PII using the compiled Pattern Registry.
#[derive(Debug, Clone, Default)]
pub struct Detector {
    config: DetectorConfig,
}

impl Detector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Find all non-overlapping detections in `text`.
    ///
    /// Every enabled recogniser runs independently; matches are merged,
    /// sorted ascending by start, then overlaps are collapsed keeping the
    /// higher-severity match (ties keep the earlier start). The merge is not
    /// re-scanned after the collapse.
    pub fn detect(&self, text: &str) -> DetectionResult {
        if text.is_empty() {
            return DetectionResult::default();
        }

        let mut raw: Vec<Detection> = Vec::new();
        for recognizer in REGISTRY.iter() {
            if self.config.disabled_types.contains(&recognizer.pii_type) {
                continue;
            }
            for m in recognizer.pattern.find_iter(text) {
                raw.push(Detection {
                    pii_type: recognizer.pii_type,
                    start: m.start(),
                    end: m.end(),
                    severity: recognizer.severity,
                });
            }
        }

        raw.sort_by_key(|d| d.start);
        let detections = collapse_overlaps(raw);
        let highest_severity = detections
            .iter()
            .map(|d| d.severity)
            .max()
            .unwrap_or(Severity::Low);

        DetectionResult {
            detections,
            highest_severity,
        }
    }

    /// Quickly check whether `text` contains any PII, without building the
    /// full detection list.
    pub fn has_any(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        REGISTRY.iter().any(|r| {
            !self.config.disabled_types.contains(&r.pii_type) && r.pattern.is_match(text)
        })
    }
}

/// Collapse a start-sorted list of detections so no two retained ranges
/// overlap, keeping the higher-severity detection on conflict and the
/// earlier-starting one when severities tie.
fn collapse_overlaps(sorted: Vec<Detection>) -> Vec<Detection> {
    let mut result: Vec<Detection> = Vec::with_capacity(sorted.len());

    for candidate in sorted {
        let mut replaced = false;
        let mut overlapped = false;
        for existing in result.iter_mut() {
            if ranges_overlap((candidate.start, candidate.end), (existing.start, existing.end)) {
                overlapped = true;
                if candidate.severity > existing.severity {
                    *existing = candidate.clone();
                    replaced = true;
                }
                break;
            }
        }
        if !overlapped {
            result.push(candidate);
        }
        let _ = replaced;
    }

    result.sort_by_key(|d| d.start);
    result
}

fn ranges_overlap(a: (usize, usize), b: (usize, usize)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_result() {
        let r = Detector::new().detect("");
        assert!(!r.has_pii());
        assert_eq!(r.highest_severity, Severity::Low);
    }

    #[test]
    fn detections_are_sorted_and_non_overlapping() {
        let r = Detector::new().detect("Email jane@acme.com and PAN ABCPD1234E");
        for w in r.detections.windows(2) {
            assert!(w[0].start <= w[1].start);
            assert!(w[0].end <= w[1].start, "ranges must not overlap");
        }
    }

    #[test]
    fn overlap_resolution_prefers_higher_severity() {
        // A PAN-shaped token also happens to satisfy the passport shape;
        // higher severity (PAN, CRITICAL) must win over passport (HIGH).
        let r = Detector::new().detect("ABCPD1234E");
        assert_eq!(r.detections.len(), 1);
        assert_eq!(r.detections[0].pii_type, PiiType::Pan);
    }

    #[test]
    fn disabled_types_are_skipped() {
        let mut cfg = DetectorConfig::default();
        cfg.disabled_types.insert(PiiType::Email);
        let d = Detector::with_config(cfg);
        let r = d.detect("contact jane@acme.com");
        assert!(!r.has_pii());
    }

    #[test]
    fn detect_is_idempotent() {
        let text = "call 555-123-4567 or email jane@acme.com";
        let a = Detector::new().detect(text);
        let b = Detector::new().detect(text);
        assert_eq!(a.detections, b.detections);
    }
}
