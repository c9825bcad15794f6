//! Policy Engine (C6): evaluates (model, app, tenant, scan result) into a
//! `PolicyDecision`, with lock-free hot reload of the in-memory policy.

use crate::policy::{default_policy, Policy, PolicyLoader};
use crate::scanner::ScanResult;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// The action a `PolicyDecision` carries. Exactly one of these per decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyAction {
    Allow,
    Block,
    Mask,
    Warn,
}

/// Output of policy evaluation. The auxiliary lists (`pii_to_mask`,
/// `warnings`) are populated only when relevant to `action`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub action: PolicyAction,
    pub reason: String,
    pub violations: Vec<String>,
    pub pii_to_mask: Vec<String>,
    pub warnings: Vec<String>,
}

impl PolicyDecision {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            action: PolicyAction::Allow,
            reason: reason.into(),
            violations: Vec::new(),
            pii_to_mask: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn block(reason: impl Into<String>, violations: Vec<String>) -> Self {
        Self {
            action: PolicyAction::Block,
            reason: reason.into(),
            violations,
            pii_to_mask: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Sort a type-string set lexicographically — the Policy Engine's
/// violation/warning lists are always produced this way so decisions are
/// deterministic across runs and hash-order variability.
fn sorted(set: BTreeSet<String>) -> Vec<String> {
    let mut v: Vec<String> = set.into_iter().collect();
    v.sort();
    v
}

fn intersect(found: &[String], rule_set: &[String]) -> BTreeSet<String> {
    let rule_set: BTreeSet<&str> = rule_set.iter().map(|s| s.as_str()).collect();
    found.iter().filter(|t| rule_set.contains(t.as_str())).cloned().collect()
}

/// Evaluates requests against the current policy. The policy is held behind
/// an `ArcSwap` so readers never take a lock on the hot path: each
/// evaluation reads the handle once at the top and uses that snapshot
/// throughout, so it observes either the pre- or post-reload policy, never a
/// half-mix.
pub struct PolicyEngine {
    policy: ArcSwap<Policy>,
    policy_file: Option<PathBuf>,
}

impl PolicyEngine {
    pub fn new(policy: Policy, policy_file: Option<PathBuf>) -> Self {
        info!(policy_name = %policy.name, "policy engine initialized");
        Self {
            policy: ArcSwap::from_pointee(policy),
            policy_file,
        }
    }

    /// Load the initial policy from `policy_file` if given, else the
    /// built-in default.
    pub fn from_file_or_default(policy_file: Option<PathBuf>) -> Self {
        let policy = match &policy_file {
            Some(path) => PolicyLoader::new().load_from_file(path),
            None => default_policy(),
        };
        Self::new(policy, policy_file)
    }

    /// Atomically swap in a freshly loaded policy. In-flight evaluations see
    /// either the old or new policy, never a mix; evaluations that begin
    /// after this returns always see the new one.
    pub fn reload(&self, policy_file: Option<&Path>) {
        let path = policy_file.map(Path::to_path_buf).or_else(|| self.policy_file.clone());
        let new_policy = match &path {
            Some(p) => PolicyLoader::new().load_from_file(p),
            None => default_policy(),
        };
        info!(policy_name = %new_policy.name, "policy reloaded");
        self.policy.store(Arc::new(new_policy));
    }

    pub fn current(&self) -> Arc<Policy> {
        self.policy.load_full()
    }

    /// Evaluate one request. Precedence, short-circuit in this order:
    /// model allow/block, app allow/block, no-PII allow, block_if, mask_if
    /// (+ warn_if carried as warnings), warn_if, else allow-with-warnings.
    pub fn evaluate(
        &self,
        model: &str,
        app_id: Option<&str>,
        tenant_id: Option<&str>,
        scan_result: &ScanResult,
    ) -> PolicyDecision {
        let policy = self.policy.load();
        let rules = policy.rules_for(tenant_id);

        if !rules.is_model_allowed(model) {
            return PolicyDecision::block(
                format!("Model '{model}' is not allowed by policy"),
                vec![format!("MODEL_NOT_ALLOWED:{model}")],
            );
        }

        if let Some(app_id) = app_id {
            if !rules.is_app_allowed(app_id) {
                return PolicyDecision::block(
                    format!("Application '{app_id}' is not allowed by policy"),
                    vec![format!("APP_NOT_ALLOWED:{app_id}")],
                );
            }
        }

        if !scan_result.has_pii() {
            return PolicyDecision::allow("No PII detected, request allowed");
        }

        let found = scan_result.risk_flags();

        let block_hits = intersect(&found, &rules.block_if);
        if !block_hits.is_empty() {
            let violations = sorted(block_hits);
            return PolicyDecision {
                action: PolicyAction::Block,
                reason: format!("Request blocked: {} detected in prompt", violations.join(", ")),
                violations,
                pii_to_mask: Vec::new(),
                warnings: Vec::new(),
            };
        }

        let mask_hits = intersect(&found, &rules.mask_if);
        if !mask_hits.is_empty() {
            let pii_to_mask = sorted(mask_hits);
            let warnings = sorted(intersect(&found, &rules.warn_if));
            return PolicyDecision {
                action: PolicyAction::Mask,
                reason: format!("PII will be masked: {}", pii_to_mask.join(", ")),
                violations: Vec::new(),
                pii_to_mask,
                warnings,
            };
        }

        let warn_hits = intersect(&found, &rules.warn_if);
        if !warn_hits.is_empty() {
            let warnings = sorted(warn_hits);
            return PolicyDecision {
                action: PolicyAction::Warn,
                reason: format!("Warning: {} detected but allowed", warnings.join(", ")),
                violations: Vec::new(),
                pii_to_mask: Vec::new(),
                warnings,
            };
        }

        // PII present but in none of the rule sets.
        PolicyDecision {
            action: PolicyAction::Allow,
            reason: "PII detected but not in policy rules".to_string(),
            violations: Vec::new(),
            pii_to_mask: Vec::new(),
            warnings: sorted(found.into_iter().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Detector;
    use crate::scanner::Scanner;
    use crate::types::ChatMessage;

    fn scan(text: &str) -> ScanResult {
        Scanner::new(Detector::new()).scan(&[ChatMessage {
            role: "user".to_string(),
            content: text.to_string(),
        }])
    }

    #[test]
    fn s1_clean_prompt_allows() {
        let engine = PolicyEngine::new(default_policy(), None);
        let decision = engine.evaluate("gpt-4o", None, None, &scan("Hello, world"));
        assert_eq!(decision.action, PolicyAction::Allow);
    }

    #[test]
    fn s2_pan_blocks() {
        let engine = PolicyEngine::new(default_policy(), None);
        let decision = engine.evaluate("gpt-4o", None, None, &scan("My PAN is ABCPD1234E"));
        assert_eq!(decision.action, PolicyAction::Block);
        assert_eq!(decision.violations, vec!["PAN".to_string()]);
    }

    #[test]
    fn s3_email_masks() {
        let engine = PolicyEngine::new(default_policy(), None);
        let decision = engine.evaluate("gpt-4o", None, None, &scan("Email me at jane@acme.com"));
        assert_eq!(decision.action, PolicyAction::Mask);
        assert_eq!(decision.pii_to_mask, vec!["EMAIL".to_string()]);
    }

    #[test]
    fn s4_ip_warns() {
        let engine = PolicyEngine::new(default_policy(), None);
        let decision = engine.evaluate("gpt-4o", None, None, &scan("Contact 192.168.1.1"));
        assert_eq!(decision.action, PolicyAction::Warn);
        assert_eq!(decision.warnings, vec!["IP_ADDRESS".to_string()]);
    }

    #[test]
    fn s5_model_not_allowed_blocks_before_pii_check() {
        let mut policy = default_policy();
        policy.rules.allowed_models = vec!["gpt-4o".to_string()];
        let engine = PolicyEngine::new(policy, None);
        let decision = engine.evaluate("gpt-3.5-turbo", None, None, &scan("Hello, world"));
        assert_eq!(decision.action, PolicyAction::Block);
        assert_eq!(decision.violations, vec!["MODEL_NOT_ALLOWED:gpt-3.5-turbo".to_string()]);
    }

    #[test]
    fn determinism_violations_are_lexicographically_sorted() {
        let mut policy = default_policy();
        policy.rules.block_if = vec!["SSN".into(), "PAN".into(), "AADHAAR".into()];
        let engine = PolicyEngine::new(policy, None);
        let decision = engine.evaluate(
            "gpt-4o",
            None,
            None,
            &scan("PAN ABCPD1234E SSN 123-45-6789 AADHAAR 1234 5678 9012"),
        );
        let mut expected = decision.violations.clone();
        expected.sort();
        assert_eq!(decision.violations, expected);
    }

    #[test]
    fn reload_is_visible_to_subsequent_evaluations() {
        let engine = PolicyEngine::new(default_policy(), None);
        assert_eq!(engine.evaluate("blocked-model", None, None, &scan("hi")).action, PolicyAction::Allow);

        let mut restrictive = default_policy();
        restrictive.rules.blocked_models = vec!["blocked-model".to_string()];
        let tmp = std::env::temp_dir().join(format!("policy-reload-test-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&tmp, serde_yaml::to_string(&restrictive).unwrap()).unwrap();

        engine.reload(Some(&tmp));
        let decision = engine.evaluate("blocked-model", None, None, &scan("hi"));
        assert_eq!(decision.action, PolicyAction::Block);

        let _ = std::fs::remove_file(&tmp);
    }

    #[test]
    fn pii_outside_rule_sets_allows_with_warnings() {
        let mut policy = default_policy();
        policy.rules.block_if.clear();
        policy.rules.mask_if.clear();
        policy.rules.warn_if.clear();
        let engine = PolicyEngine::new(policy, None);
        let decision = engine.evaluate("gpt-4o", None, None, &scan("Email me at jane@acme.com"));
        assert_eq!(decision.action, PolicyAction::Allow);
        assert_eq!(decision.warnings, vec!["EMAIL".to_string()]);
    }
}
