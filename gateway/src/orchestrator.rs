//! Enforcement Orchestrator (C10): the Received -> Scan -> Evaluate ->
//! {Block | Mask -> Forward | Allow/Warn -> Forward} -> Audit/Alert -> Return
//! state machine that every other component feeds into.

use crate::alerter::{Alerter, ViolationEvent};
use crate::audit::{prompt_fingerprint, AuditEmitter, AuditRecord};
use crate::config::{EnforcementMode, Settings};
use crate::engine::{PolicyAction, PolicyEngine};
use crate::error::GatewayError;
use crate::masker::Masker;
use crate::providers::ProviderAdapter;
use crate::scanner::{ScanResult, Scanner};
use crate::types::ChatMessage;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Everything one request carries through the pipeline, independent of the
/// HTTP framing around it.
pub struct ChatCompletionRequest {
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub extra: Map<String, Value>,
    /// The body's own `user` field, forwarded to the provider verbatim.
    pub body_user: Option<String>,
    pub app_id: Option<String>,
    /// `X-User-Id` header, attached to the audit record, not forwarded upstream.
    pub user_id: Option<String>,
    pub org_id: Option<String>,
    pub request_id: Uuid,
}

/// Wires the Scanner, Policy Engine, Masker, a Provider Adapter, the Audit
/// Emitter, and the Alerter into the request flow described by the
/// orchestrator's state machine.
pub struct Orchestrator {
    scanner: Scanner,
    policy_engine: Arc<PolicyEngine>,
    masker: Masker,
    provider: Arc<dyn ProviderAdapter>,
    audit_emitter: Arc<AuditEmitter>,
    alerter: Arc<Alerter>,
    settings: Settings,
}

impl Orchestrator {
    pub fn new(
        scanner: Scanner,
        policy_engine: Arc<PolicyEngine>,
        provider: Arc<dyn ProviderAdapter>,
        audit_emitter: Arc<AuditEmitter>,
        alerter: Arc<Alerter>,
        settings: Settings,
    ) -> Self {
        Self {
            scanner,
            policy_engine,
            masker: Masker::new(),
            provider,
            audit_emitter,
            alerter,
            settings,
        }
    }

    pub async fn handle(&self, request: ChatCompletionRequest) -> Result<(Value, u16), GatewayError> {
        let request_id = request.request_id;

        if request.stream {
            return Err(GatewayError::StreamingNotSupported);
        }

        let model = request.model.clone().unwrap_or_else(|| self.settings.default_model.clone());
        let prompt_fingerprint = prompt_fingerprint(&request.messages);

        let mut messages = request.messages.clone();
        let mut risk_flags: Vec<String> = Vec::new();
        let mut action_taken = "allowed".to_string();
        let mut violations: Vec<String> = Vec::new();
        let mut decision_reason = String::new();
        let mut suppressed_decision: Option<PolicyAction> = None;

        if self.settings.pii_detection_enabled {
            let scan_result: ScanResult = self.scanner.scan(&messages);

            if scan_result.has_pii() {
                risk_flags = scan_result.risk_flags();
                info!(request_id = %request_id, pii_types = ?risk_flags, "PII detected in request");
            }

            let decision = self.policy_engine.evaluate(
                &model,
                request.app_id.as_deref(),
                request.org_id.as_deref(),
                &scan_result,
            );
            violations = decision.violations.clone();
            decision_reason = decision.reason.clone();

            if self.settings.enforcement_mode == EnforcementMode::Enforce && decision.action == PolicyAction::Block {
                self.dispatch_block_alert(&request, &model, request_id, &violations, scan_result.critical_found());
                self.dispatch_audit_blocked(&request, &model, request_id, &prompt_fingerprint, &risk_flags, &violations, &decision_reason);
                return Err(self.block_error(request_id, &violations, &decision_reason));
            }

            let (outcome, suppressed, should_mask) = effective_outcome(&self.settings.enforcement_mode, decision.action);
            action_taken = outcome.to_string();
            suppressed_decision = suppressed;

            if should_mask {
                messages = self.masker.mask_messages(&messages, &scan_result, None);
                info!(request_id = %request_id, masked_types = ?decision.pii_to_mask, "PII masked before forwarding");
            } else if action_taken == "warned" {
                warn!(request_id = %request_id, violations = ?violations, "policy violation observed in warn mode");
            }
        }

        let mut payload = request.extra.clone();
        payload.insert("model".to_string(), json!(model));
        payload.insert("messages".to_string(), json!(messages));
        if let Some(user) = &request.body_user {
            payload.insert("user".to_string(), json!(user));
        }

        let started = Instant::now();
        let call_result = self.provider.chat_completion(&Value::Object(payload)).await;
        let latency_ms = started.elapsed().as_millis() as i64;

        let mut metadata = Map::new();
        metadata.insert("action".to_string(), json!(action_taken));
        if let Some(suppressed) = suppressed_decision {
            metadata.insert("decision".to_string(), json!(decision_label(suppressed)));
        }
        if !violations.is_empty() {
            metadata.insert("violations".to_string(), json!(violations));
        }
        if !decision_reason.is_empty() {
            metadata.insert("reason".to_string(), json!(decision_reason));
        }

        let (token_in, token_out) = match &call_result {
            Ok((body, status)) => {
                if *status >= 400 {
                    metadata.insert("upstream_status".to_string(), json!(status));
                }
                extract_token_usage(body)
            }
            Err(e) => {
                metadata.insert("upstream_error".to_string(), json!(e.to_string()));
                (None, None)
            }
        };

        let record = AuditRecord {
            id: request_id,
            tenant_id: request.org_id.clone().unwrap_or_else(|| "default".to_string()),
            app_id: request.app_id.clone().unwrap_or_else(|| "unknown".to_string()),
            user_id: request.user_id.clone(),
            model: model.clone(),
            provider: self.provider.provider_name().to_string(),
            prompt_fingerprint,
            token_count_input: token_in,
            token_count_output: token_out,
            latency_ms,
            risk_flags: risk_flags.clone(),
            metadata,
            created_at: Utc::now(),
        };

        let emitter = self.audit_emitter.clone();
        tokio::spawn(async move { emitter.emit(record).await });

        if action_taken == "masked" {
            let alerter_violation = self.mask_alert(&request, &model, request_id, &risk_flags);
            let alerter = self.alerter.clone();
            tokio::spawn(async move { alerter.send_alert(&alerter_violation).await });
        }

        // Upstream application failures (4xx/5xx from the provider) propagate
        // verbatim rather than becoming a gateway-level error; only a
        // transport failure (timeout, connection error) is.
        let (body, status) = call_result?;
        Ok((body, status))
    }

    fn block_error(&self, request_id: Uuid, violations: &[String], reason: &str) -> GatewayError {
        let code = if violations.iter().any(|v| v.starts_with("MODEL_NOT_ALLOWED")) {
            "model_not_allowed"
        } else if violations.iter().any(|v| v.starts_with("APP_NOT_ALLOWED")) {
            "app_not_allowed"
        } else {
            "pii_detected"
        };
        GatewayError::PolicyBlocked {
            code,
            reason: reason.to_string(),
            violations: violations.to_vec(),
            request_id,
        }
    }

    fn dispatch_block_alert(
        &self,
        request: &ChatCompletionRequest,
        model: &str,
        request_id: Uuid,
        violations: &[String],
        critical_found: bool,
    ) {
        let violation = ViolationEvent {
            violation_type: if violations.is_empty() { "policy_violation" } else { "pii_detected" }.to_string(),
            violations: violations.to_vec(),
            tenant_id: request.org_id.clone(),
            app_id: request.app_id.clone(),
            user_id: request.user_id.clone(),
            model: Some(model.to_string()),
            request_id,
            timestamp: Utc::now(),
            action_taken: "blocked".to_string(),
            severity: if critical_found { "critical" } else { "high" }.to_string(),
        };
        let alerter = self.alerter.clone();
        tokio::spawn(async move { alerter.send_alert(&violation).await });
    }

    fn dispatch_audit_blocked(
        &self,
        request: &ChatCompletionRequest,
        model: &str,
        request_id: Uuid,
        prompt_fingerprint: &str,
        risk_flags: &[String],
        violations: &[String],
        reason: &str,
    ) {
        let mut metadata = Map::new();
        metadata.insert("action".to_string(), json!("blocked"));
        metadata.insert("violations".to_string(), json!(violations));
        metadata.insert("reason".to_string(), json!(reason));

        let record = AuditRecord {
            id: request_id,
            tenant_id: request.org_id.clone().unwrap_or_else(|| "default".to_string()),
            app_id: request.app_id.clone().unwrap_or_else(|| "unknown".to_string()),
            user_id: request.user_id.clone(),
            model: model.to_string(),
            provider: self.provider.provider_name().to_string(),
            prompt_fingerprint: prompt_fingerprint.to_string(),
            token_count_input: None,
            token_count_output: None,
            latency_ms: 0,
            risk_flags: risk_flags.to_vec(),
            metadata,
            created_at: Utc::now(),
        };
        let emitter = self.audit_emitter.clone();
        tokio::spawn(async move { emitter.emit(record).await });
    }

    /// Always constructs the event and lets `Alerter::send_alert` gate on
    /// whichever sinks are actually configured, matching `dispatch_block_alert`.
    fn mask_alert(&self, request: &ChatCompletionRequest, model: &str, request_id: Uuid, risk_flags: &[String]) -> ViolationEvent {
        ViolationEvent {
            violation_type: "pii_masked".to_string(),
            violations: risk_flags.to_vec(),
            tenant_id: request.org_id.clone(),
            app_id: request.app_id.clone(),
            user_id: request.user_id.clone(),
            model: Some(model.to_string()),
            request_id,
            timestamp: Utc::now(),
            action_taken: "masked".to_string(),
            severity: "medium".to_string(),
        }
    }
}

/// Human-readable label for a raw policy action, independent of enforcement
/// mode — used both for `action_taken` under `Enforce` and for the
/// `metadata.decision` field recording a mode-suppressed decision.
fn decision_label(action: PolicyAction) -> &'static str {
    match action {
        PolicyAction::Allow => "allowed",
        PolicyAction::Block => "blocked",
        PolicyAction::Mask => "masked",
        PolicyAction::Warn => "warned",
    }
}

/// Resolves a raw policy decision against the configured enforcement mode
/// into `(action_taken, suppressed_decision, should_mask)`. `Enforce` mode's
/// `Block` case is handled separately in `handle` (it short-circuits before
/// any of this, with its own alert/audit dispatch); every other
/// mode/action combination is resolved here.
fn effective_outcome(mode: &EnforcementMode, action: PolicyAction) -> (&'static str, Option<PolicyAction>, bool) {
    match mode {
        EnforcementMode::Enforce => match action {
            PolicyAction::Mask => ("masked", None, true),
            PolicyAction::Warn => ("warned", None, false),
            other => (decision_label(other), None, false),
        },
        EnforcementMode::Warn => match action {
            PolicyAction::Block | PolicyAction::Mask => ("warned", Some(action), false),
            PolicyAction::Warn => ("warned", None, false),
            PolicyAction::Allow => ("allowed", None, false),
        },
        EnforcementMode::LogOnly => match action {
            PolicyAction::Allow => ("allowed", None, false),
            other => ("allowed", Some(other), false),
        },
    }
}

fn extract_token_usage(response: &Value) -> (Option<i64>, Option<i64>) {
    let usage = response.get("usage");
    let input = usage.and_then(|u| u.get("prompt_tokens")).and_then(Value::as_i64);
    let output = usage.and_then(|u| u.get("completion_tokens")).and_then(Value::as_i64);
    (input, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AiProvider;
    use crate::detector::Detector;
    use crate::policy::default_policy;
    use crate::providers::ProviderError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn extract_token_usage_reads_nested_fields() {
        let response = json!({"usage": {"prompt_tokens": 12, "completion_tokens": 34}});
        assert_eq!(extract_token_usage(&response), (Some(12), Some(34)));
    }

    #[test]
    fn extract_token_usage_tolerates_missing_usage() {
        let response = json!({"id": "chatcmpl-1"});
        assert_eq!(extract_token_usage(&response), (None, None));
    }

    #[test]
    fn effective_outcome_enforce_mask_masks_without_suppressing() {
        assert_eq!(effective_outcome(&EnforcementMode::Enforce, PolicyAction::Mask), ("masked", None, true));
    }

    #[test]
    fn effective_outcome_enforce_warn_is_warned_not_suppressed() {
        assert_eq!(effective_outcome(&EnforcementMode::Enforce, PolicyAction::Warn), ("warned", None, false));
    }

    #[test]
    fn effective_outcome_warn_mode_suppresses_block_and_mask() {
        assert_eq!(
            effective_outcome(&EnforcementMode::Warn, PolicyAction::Block),
            ("warned", Some(PolicyAction::Block), false)
        );
        assert_eq!(
            effective_outcome(&EnforcementMode::Warn, PolicyAction::Mask),
            ("warned", Some(PolicyAction::Mask), false)
        );
    }

    /// S7: a PAN prompt under `log_only` is forwarded (`action=allowed`) but
    /// records the decision that enforcement would have taken.
    #[test]
    fn effective_outcome_log_only_suppresses_block_but_still_allows() {
        assert_eq!(
            effective_outcome(&EnforcementMode::LogOnly, PolicyAction::Block),
            ("allowed", Some(PolicyAction::Block), false)
        );
    }

    #[test]
    fn effective_outcome_log_only_leaves_allow_unsuppressed() {
        assert_eq!(effective_outcome(&EnforcementMode::LogOnly, PolicyAction::Allow), ("allowed", None, false));
    }

    /// Captures whatever payload it was last called with, for assertions,
    /// and returns a canned upstream response.
    struct MockProvider {
        last_payload: Mutex<Option<Value>>,
    }

    impl MockProvider {
        fn new() -> Self {
            Self { last_payload: Mutex::new(None) }
        }

        fn last_payload(&self) -> Value {
            self.last_payload.lock().unwrap().clone().expect("provider was never called")
        }
    }

    #[async_trait]
    impl ProviderAdapter for MockProvider {
        async fn chat_completion(&self, payload: &Value) -> Result<(Value, u16), ProviderError> {
            *self.last_payload.lock().unwrap() = Some(payload.clone());
            Ok((json!({"id": "chatcmpl-test", "usage": {"prompt_tokens": 1, "completion_tokens": 1}}), 200))
        }

        fn provider_name(&self) -> &'static str {
            "mock"
        }
    }

    fn test_settings(enforcement_mode: EnforcementMode) -> Settings {
        Settings {
            ai_provider: AiProvider::OpenAi,
            openai_api_key: String::new(),
            azure_openai_endpoint: String::new(),
            azure_openai_api_key: String::new(),
            azure_openai_deployment: String::new(),
            azure_openai_api_version: String::new(),
            default_model: "gpt-4o".to_string(),
            audit_service_url: "http://127.0.0.1:1".to_string(),
            pii_detection_enabled: true,
            policy_file: None,
            policy_hot_reload: false,
            enforcement_mode,
            alert_slack_webhook: None,
            alert_email_enabled: false,
            alert_email_smtp_host: String::new(),
            alert_email_smtp_port: 587,
            alert_email_smtp_user: None,
            alert_email_smtp_password: None,
            alert_email_from: String::new(),
            alert_email_to: Vec::new(),
            port: 0,
        }
    }

    fn request(messages: Vec<(&str, &str)>, model: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: Some(model.to_string()),
            messages: messages
                .into_iter()
                .map(|(role, content)| ChatMessage { role: role.to_string(), content: content.to_string() })
                .collect(),
            stream: false,
            extra: Map::new(),
            body_user: None,
            app_id: Some("test-app".to_string()),
            user_id: Some("test-user".to_string()),
            org_id: None,
            request_id: Uuid::new_v4(),
        }
    }

    fn test_orchestrator(mode: EnforcementMode) -> (Arc<Orchestrator>, Arc<MockProvider>) {
        let settings = test_settings(mode);
        let provider = Arc::new(MockProvider::new());
        let orchestrator = Orchestrator::new(
            Scanner::new(Detector::new()),
            Arc::new(PolicyEngine::new(default_policy(), None)),
            provider.clone(),
            Arc::new(AuditEmitter::new(settings.audit_service_url.clone())),
            Arc::new(Alerter::new(None, None)),
            settings,
        );
        (Arc::new(orchestrator), provider)
    }

    #[tokio::test]
    async fn s1_clean_prompt_is_allowed_and_forwarded_unchanged() {
        let (orchestrator, provider) = test_orchestrator(EnforcementMode::Enforce);
        let result = orchestrator.handle(request(vec![("user", "Hello, world")], "gpt-4o")).await;
        assert!(result.is_ok());
        let payload = provider.last_payload();
        assert_eq!(payload["messages"][0]["content"], "Hello, world");
    }

    #[tokio::test]
    async fn s2_pan_prompt_is_blocked() {
        let (orchestrator, _provider) = test_orchestrator(EnforcementMode::Enforce);
        let err = orchestrator.handle(request(vec![("user", "My PAN is ABCPD1234E")], "gpt-4o")).await.unwrap_err();
        match err {
            GatewayError::PolicyBlocked { violations, .. } => assert_eq!(violations, vec!["PAN".to_string()]),
            other => panic!("expected PolicyBlocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn s3_email_is_masked_before_forwarding() {
        let (orchestrator, provider) = test_orchestrator(EnforcementMode::Enforce);
        let result = orchestrator.handle(request(vec![("user", "Email me at jane@acme.com")], "gpt-4o")).await;
        assert!(result.is_ok());
        let payload = provider.last_payload();
        assert_eq!(payload["messages"][0]["content"], "Email me at [EMAIL_REDACTED]");
    }

    #[tokio::test]
    async fn s5_model_not_allowed_blocks() {
        let settings = test_settings(EnforcementMode::Enforce);
        let mut policy = default_policy();
        policy.rules.allowed_models = vec!["gpt-4o".to_string()];
        let provider = Arc::new(MockProvider::new());
        let orchestrator = Orchestrator::new(
            Scanner::new(Detector::new()),
            Arc::new(PolicyEngine::new(policy, None)),
            provider,
            Arc::new(AuditEmitter::new(settings.audit_service_url.clone())),
            Arc::new(Alerter::new(None, None)),
            settings,
        );
        let err = orchestrator.handle(request(vec![("user", "Hello")], "gpt-3.5-turbo")).await.unwrap_err();
        match err {
            GatewayError::PolicyBlocked { violations, .. } => {
                assert_eq!(violations, vec!["MODEL_NOT_ALLOWED:gpt-3.5-turbo".to_string()])
            }
            other => panic!("expected PolicyBlocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn s6_concurrent_requests_get_independent_outcomes() {
        let (orchestrator, _provider) = test_orchestrator(EnforcementMode::Enforce);
        let blocked = orchestrator.clone();
        let allowed = orchestrator.clone();
        let (blocked_result, allowed_result) = tokio::join!(
            blocked.handle(request(vec![("user", "My PAN is ABCPD1234E")], "gpt-4o")),
            allowed.handle(request(vec![("user", "Hello, world")], "gpt-4o")),
        );
        assert!(blocked_result.is_err());
        assert!(allowed_result.is_ok());
    }
}
