//! Audit Record Schema (C12): the row shape persisted by the audit store and
//! the request/response schemas the read/write API exposes over it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use uuid::Uuid;

/// Row as stored in and read back from `audit_logs`. `risk_flags` and
/// `metadata` round-trip through JSON columns.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLogRow {
    pub id: Uuid,
    pub tenant_id: String,
    pub app_id: String,
    pub user_id: Option<String>,
    pub model: String,
    pub provider: String,
    pub prompt_fingerprint: String,
    pub token_count_input: Option<i64>,
    pub token_count_output: Option<i64>,
    pub latency_ms: Option<i64>,
    pub risk_flags: Value,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditLogRow {
    pub fn risk_flags_vec(&self) -> Vec<String> {
        self.risk_flags
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }

    pub fn metadata_map(&self) -> Map<String, Value> {
        self.metadata.as_object().cloned().unwrap_or_default()
    }

    pub fn action(&self) -> String {
        self.metadata_map()
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("allowed")
            .to_string()
    }
}

/// Inbound write payload. The gateway may supply its own `id` (fire-and-
/// forget emission); when absent a fresh one is generated.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditLogCreate {
    pub id: Option<Uuid>,
    pub tenant_id: String,
    pub app_id: String,
    pub user_id: Option<String>,
    pub model: String,
    pub provider: String,
    pub prompt_fingerprint: String,
    pub token_count_input: Option<i64>,
    pub token_count_output: Option<i64>,
    pub latency_ms: Option<i64>,
    #[serde(default)]
    pub risk_flags: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditLogResponse {
    pub id: Uuid,
    pub tenant_id: String,
    pub app_id: String,
    pub user_id: Option<String>,
    pub model: String,
    pub provider: String,
    pub prompt_fingerprint: String,
    pub token_count_input: Option<i64>,
    pub token_count_output: Option<i64>,
    pub latency_ms: Option<i64>,
    pub risk_flags: Vec<String>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl From<AuditLogRow> for AuditLogResponse {
    fn from(row: AuditLogRow) -> Self {
        Self {
            risk_flags: row.risk_flags_vec(),
            metadata: row.metadata_map(),
            id: row.id,
            tenant_id: row.tenant_id,
            app_id: row.app_id,
            user_id: row.user_id,
            model: row.model,
            provider: row.provider,
            prompt_fingerprint: row.prompt_fingerprint,
            token_count_input: row.token_count_input,
            token_count_output: row.token_count_output,
            latency_ms: row.latency_ms,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub pages: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: i64, page: i64, limit: i64) -> Self {
        let pages = if limit <= 0 { 0 } else { (total + limit - 1) / limit };
        Self { items, total, page, limit, pages }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct LogListFilter {
    pub tenant_id: Option<String>,
    pub app_id: Option<String>,
    pub user_id: Option<String>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub has_risk_flags: Option<bool>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub total_requests: i64,
    pub total_tokens_input: i64,
    pub total_tokens_output: i64,
    pub unique_models: i64,
    pub unique_apps: i64,
    pub requests_with_risk_flags: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViolationResponse {
    pub id: Uuid,
    pub tenant_id: String,
    pub app_id: String,
    pub user_id: Option<String>,
    pub model: String,
    pub risk_flags: Vec<String>,
    pub action: String,
    pub created_at: DateTime<Utc>,
}

impl From<AuditLogRow> for ViolationResponse {
    fn from(row: AuditLogRow) -> Self {
        Self {
            risk_flags: row.risk_flags_vec(),
            action: row.action(),
            id: row.id,
            tenant_id: row.tenant_id,
            app_id: row.app_id,
            user_id: row.user_id,
            model: row.model,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ViolationSummary {
    pub total_violations: i64,
    pub total_blocked: i64,
    pub total_masked: i64,
    pub total_warned: i64,
    pub by_type: std::collections::BTreeMap<String, i64>,
    pub by_action: std::collections::BTreeMap<String, i64>,
    pub by_severity: std::collections::BTreeMap<String, i64>,
    pub top_violating_apps: Vec<TopEntry>,
    pub top_violating_tenants: Vec<TopEntry>,
    pub recent_violations: Vec<ViolationResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopEntry {
    pub key: String,
    pub violation_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViolationTrendPoint {
    pub date: String,
    pub total: i64,
    pub blocked: i64,
    pub masked: i64,
    pub warned: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeBreakdownEntry {
    pub pii_type: String,
    pub total: i64,
    pub blocked: i64,
    pub masked: i64,
    pub warned: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paginated_response_computes_page_count() {
        let resp: PaginatedResponse<()> = PaginatedResponse::new(vec![], 105, 1, 50);
        assert_eq!(resp.pages, 3);
    }

    #[test]
    fn row_action_defaults_to_allowed_when_metadata_lacks_it() {
        let row = AuditLogRow {
            id: Uuid::nil(),
            tenant_id: "t".into(),
            app_id: "a".into(),
            user_id: None,
            model: "gpt-4o".into(),
            provider: "openai".into(),
            prompt_fingerprint: "abc".into(),
            token_count_input: None,
            token_count_output: None,
            latency_ms: None,
            risk_flags: serde_json::json!([]),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        };
        assert_eq!(row.action(), "allowed");
    }
}
