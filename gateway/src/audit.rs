//! Audit Emitter (C8): builds Audit Records from request context and ships
//! them to the audit store asynchronously, relative to the client response.

use crate::types::ChatMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::error;
use uuid::Uuid;

const EMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Immutable audit record, built synchronously on the request thread and
/// persisted asynchronously. Loss on crash before persistence is tolerated
/// but must be logged by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub app_id: String,
    pub user_id: Option<String>,
    pub model: String,
    pub provider: String,
    pub prompt_fingerprint: String,
    pub token_count_input: Option<i64>,
    pub token_count_output: Option<i64>,
    pub latency_ms: i64,
    pub risk_flags: Vec<String>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// SHA-256 over `role:content` for each input message, in order, computed
/// BEFORE any masking — this is what makes the fingerprint identify the
/// original prompt and stay stable across policy changes.
pub fn prompt_fingerprint(messages: &[ChatMessage]) -> String {
    let mut hasher = Sha256::new();
    for m in messages {
        hasher.update(m.role.as_bytes());
        hasher.update(b":");
        hasher.update(m.content.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Ships Audit Records to the audit store over HTTP, off the request's
/// response path. Delivery is best-effort: failures are logged, not
/// retried, and never surface to the client.
pub struct AuditEmitter {
    client: reqwest::Client,
    audit_store_url: String,
}

impl AuditEmitter {
    pub fn new(audit_store_url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(EMIT_TIMEOUT)
                .build()
                .expect("reqwest client configuration is valid"),
            audit_store_url,
        }
    }

    /// Send one record. Intended to be spawned as a background task; never
    /// propagates an error to the caller, only logs it.
    pub async fn emit(&self, record: AuditRecord) {
        let url = format!("{}/api/v1/logs", self.audit_store_url);
        let record_id = record.id;
        if let Err(e) = self.client.post(&url).json(&record).send().await {
            error!(request_id = %record_id, error = %e, "failed to send audit log");
        }
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
    fn fingerprint_is_stable_and_order_sensitive() {
        let a = vec![msg("user", "hello"), msg("assistant", "hi")];
        let b = vec![msg("user", "hello"), msg("assistant", "hi")];
        let c = vec![msg("assistant", "hi"), msg("user", "hello")];
        assert_eq!(prompt_fingerprint(&a), prompt_fingerprint(&b));
        assert_ne!(prompt_fingerprint(&a), prompt_fingerprint(&c));
    }

    #[test]
    fn fingerprint_is_computed_before_masking() {
        let original = vec![msg("user", "my email is jane@acme.com")];
        let masked = vec![msg("user", "my email is [EMAIL_REDACTED]")];
        assert_ne!(prompt_fingerprint(&original), prompt_fingerprint(&masked));
    }
}
