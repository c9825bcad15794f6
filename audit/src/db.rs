//! Audit Store (C11) persistence: a Postgres-backed, append-only log of
//! Audit Records plus the read-side aggregations the violations API exposes.

use crate::error::AuditError;
use crate::models::{
    AuditLogCreate, AuditLogRow, LogListFilter, StatsResponse, TopEntry, TypeBreakdownEntry,
    ViolationResponse, ViolationSummary, ViolationTrendPoint,
};
use crate::severity::severity_bucket;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres, QueryBuilder};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Ceiling on a single CSV export pull — the only limit that applies to
/// `/logs/export/csv`. Independent of the paginated list endpoint's page
/// size (`LogListFilter`'s own 100-row clamp in `list`).
pub const EXPORT_ROW_LIMIT: i64 = 50_000;

#[derive(Clone)]
pub struct AuditDb {
    pool: Pool<Postgres>,
}

impl AuditDb {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Build directly from an already-configured pool — used by tests that
    /// get a `PgPool` handed to them by `sqlx::test` rather than a URL.
    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Insert one record. Idempotent on `id`: a retried emission with the
    /// same id is a no-op, matching the append-only, immutable audit log.
    pub async fn insert(&self, log: AuditLogCreate) -> Result<AuditLogRow, AuditError> {
        let id = log.id.unwrap_or_else(Uuid::new_v4);
        let risk_flags = serde_json::json!(log.risk_flags);
        let metadata = serde_json::Value::Object(log.metadata);

        let row = sqlx::query_as::<_, AuditLogRow>(
            r#"
            INSERT INTO audit_logs
                (id, tenant_id, app_id, user_id, model, provider, prompt_fingerprint,
                 token_count_input, token_count_output, latency_ms, risk_flags, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO NOTHING
            RETURNING id, tenant_id, app_id, user_id, model, provider, prompt_fingerprint,
                      token_count_input, token_count_output, latency_ms, risk_flags, metadata, created_at
            "#,
        )
        .bind(id)
        .bind(&log.tenant_id)
        .bind(&log.app_id)
        .bind(&log.user_id)
        .bind(&log.model)
        .bind(&log.provider)
        .bind(&log.prompt_fingerprint)
        .bind(log.token_count_input)
        .bind(log.token_count_output)
        .bind(log.latency_ms)
        .bind(&risk_flags)
        .bind(&metadata)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row),
            // Conflict hit: the record already exists, fetch it as-is.
            None => self.get(id).await?.ok_or(AuditError::NotFound),
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<AuditLogRow>, AuditError> {
        let row = sqlx::query_as::<_, AuditLogRow>(
            "SELECT id, tenant_id, app_id, user_id, model, provider, prompt_fingerprint,
                    token_count_input, token_count_output, latency_ms, risk_flags, metadata, created_at
             FROM audit_logs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list(&self, filter: &LogListFilter) -> Result<(Vec<AuditLogRow>, i64), AuditError> {
        let limit = filter.limit.clamp(1, 100);
        let page = filter.page.max(1);
        let offset = (page - 1) * limit;

        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM audit_logs WHERE 1=1");
        push_filters(&mut count_qb, filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select_qb = QueryBuilder::new(
            "SELECT id, tenant_id, app_id, user_id, model, provider, prompt_fingerprint,
                    token_count_input, token_count_output, latency_ms, risk_flags, metadata, created_at
             FROM audit_logs WHERE 1=1",
        );
        push_filters(&mut select_qb, filter);
        select_qb.push(" ORDER BY created_at DESC LIMIT ");
        select_qb.push_bind(limit);
        select_qb.push(" OFFSET ");
        select_qb.push_bind(offset);

        let rows = select_qb.build_query_as::<AuditLogRow>().fetch_all(&self.pool).await?;
        Ok((rows, total))
    }

    /// Like `list`, but for CSV export: a single unpaginated pull capped at
    /// a much higher ceiling than the API page-size limit.
    pub async fn list_for_export(&self, filter: &LogListFilter) -> Result<Vec<AuditLogRow>, AuditError> {
        let limit = filter.limit.clamp(1, EXPORT_ROW_LIMIT);
        let mut qb = QueryBuilder::new(
            "SELECT id, tenant_id, app_id, user_id, model, provider, prompt_fingerprint,
                    token_count_input, token_count_output, latency_ms, risk_flags, metadata, created_at
             FROM audit_logs WHERE 1=1",
        );
        push_filters(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC LIMIT ");
        qb.push_bind(limit);
        let rows = qb.build_query_as::<AuditLogRow>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    pub async fn stats(
        &self,
        tenant_id: Option<&str>,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<StatsResponse, AuditError> {
        let filter = LogListFilter {
            tenant_id: tenant_id.map(str::to_string),
            start_date,
            end_date,
            limit: i64::MAX,
            ..Default::default()
        };

        let mut qb = QueryBuilder::new(
            "SELECT
                COUNT(*) AS total_requests,
                COALESCE(SUM(token_count_input), 0) AS total_tokens_input,
                COALESCE(SUM(token_count_output), 0) AS total_tokens_output,
                COUNT(DISTINCT model) AS unique_models,
                COUNT(DISTINCT app_id) AS unique_apps,
                COUNT(*) FILTER (WHERE jsonb_array_length(risk_flags) > 0) AS requests_with_risk_flags
             FROM audit_logs WHERE 1=1",
        );
        push_filters(&mut qb, &filter);

        let row: (i64, i64, i64, i64, i64, i64) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(StatsResponse {
            total_requests: row.0,
            total_tokens_input: row.1,
            total_tokens_output: row.2,
            unique_models: row.3,
            unique_apps: row.4,
            requests_with_risk_flags: row.5,
        })
    }

    pub async fn violations_summary(
        &self,
        tenant_id: Option<&str>,
        app_id: Option<&str>,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<ViolationSummary, AuditError> {
        let filter = LogListFilter {
            tenant_id: tenant_id.map(str::to_string),
            app_id: app_id.map(str::to_string),
            start_date,
            end_date,
            has_risk_flags: Some(true),
            limit: i64::MAX,
            ..Default::default()
        };

        let mut qb = QueryBuilder::new(
            "SELECT id, tenant_id, app_id, user_id, model, provider, prompt_fingerprint,
                    token_count_input, token_count_output, latency_ms, risk_flags, metadata, created_at
             FROM audit_logs WHERE 1=1",
        );
        push_filters(&mut qb, &filter);
        let rows = qb.build_query_as::<AuditLogRow>().fetch_all(&self.pool).await?;

        let total_violations = rows.len() as i64;
        let mut by_action: BTreeMap<String, i64> = BTreeMap::new();
        let mut by_type: BTreeMap<String, i64> = BTreeMap::new();
        let mut by_severity: BTreeMap<String, i64> = BTreeMap::new();
        let mut app_counts: BTreeMap<String, i64> = BTreeMap::new();
        let mut tenant_counts: BTreeMap<String, i64> = BTreeMap::new();

        for row in &rows {
            *by_action.entry(row.action()).or_insert(0) += 1;
            *app_counts.entry(row.app_id.clone()).or_insert(0) += 1;
            *tenant_counts.entry(row.tenant_id.clone()).or_insert(0) += 1;
            for pii_type in row.risk_flags_vec() {
                *by_type.entry(pii_type.clone()).or_insert(0) += 1;
                *by_severity.entry(severity_bucket(&pii_type).to_string()).or_insert(0) += 1;
            }
        }

        let mut top_apps: Vec<TopEntry> =
            app_counts.into_iter().map(|(key, violation_count)| TopEntry { key, violation_count }).collect();
        top_apps.sort_by(|a, b| b.violation_count.cmp(&a.violation_count));
        top_apps.truncate(10);

        let mut top_tenants: Vec<TopEntry> =
            tenant_counts.into_iter().map(|(key, violation_count)| TopEntry { key, violation_count }).collect();
        top_tenants.sort_by(|a, b| b.violation_count.cmp(&a.violation_count));
        top_tenants.truncate(10);

        let mut recent: Vec<AuditLogRow> = rows;
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(10);

        Ok(ViolationSummary {
            total_violations,
            total_blocked: *by_action.get("blocked").unwrap_or(&0),
            total_masked: *by_action.get("masked").unwrap_or(&0),
            total_warned: *by_action.get("warned").unwrap_or(&0),
            by_type,
            by_action,
            by_severity,
            top_violating_apps: top_apps,
            top_violating_tenants: top_tenants,
            recent_violations: recent.into_iter().map(ViolationResponse::from).collect(),
        })
    }

    pub async fn list_violations(
        &self,
        filter: &LogListFilter,
        pii_type: Option<&str>,
        action: Option<&str>,
    ) -> Result<Vec<ViolationResponse>, AuditError> {
        let mut filter = filter.clone();
        filter.has_risk_flags = Some(true);
        let limit = filter.limit.clamp(1, 100);
        let page = filter.page.max(1);
        let offset = (page - 1) * limit;

        let mut qb = QueryBuilder::new(
            "SELECT id, tenant_id, app_id, user_id, model, provider, prompt_fingerprint,
                    token_count_input, token_count_output, latency_ms, risk_flags, metadata, created_at
             FROM audit_logs WHERE 1=1",
        );
        push_filters(&mut qb, &filter);
        if let Some(pii_type) = pii_type {
            qb.push(" AND risk_flags @> ");
            qb.push_bind(serde_json::json!([pii_type]));
        }
        qb.push(" ORDER BY created_at DESC LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows = qb.build_query_as::<AuditLogRow>().fetch_all(&self.pool).await?;
        let mut violations: Vec<ViolationResponse> = rows.into_iter().map(ViolationResponse::from).collect();
        if let Some(action) = action {
            violations.retain(|v| v.action == action);
        }
        Ok(violations)
    }

    pub async fn violation_trends(
        &self,
        tenant_id: Option<&str>,
        days: i64,
    ) -> Result<(Vec<ViolationTrendPoint>, DateTime<Utc>, DateTime<Utc>), AuditError> {
        let end_date = Utc::now();
        let start_date = end_date - Duration::days(days.clamp(1, 365));

        let filter = LogListFilter {
            tenant_id: tenant_id.map(str::to_string),
            start_date: Some(start_date),
            end_date: Some(end_date),
            has_risk_flags: Some(true),
            limit: i64::MAX,
            ..Default::default()
        };

        let mut qb = QueryBuilder::new(
            "SELECT id, tenant_id, app_id, user_id, model, provider, prompt_fingerprint,
                    token_count_input, token_count_output, latency_ms, risk_flags, metadata, created_at
             FROM audit_logs WHERE 1=1",
        );
        push_filters(&mut qb, &filter);
        let rows = qb.build_query_as::<AuditLogRow>().fetch_all(&self.pool).await?;

        let mut daily: BTreeMap<String, (i64, i64, i64, i64)> = BTreeMap::new();
        for row in rows {
            let date = row.created_at.format("%Y-%m-%d").to_string();
            let entry = daily.entry(date).or_insert((0, 0, 0, 0));
            entry.0 += 1;
            match row.action().as_str() {
                "blocked" => entry.1 += 1,
                "masked" => entry.2 += 1,
                "warned" => entry.3 += 1,
                _ => {}
            }
        }

        let trends = daily
            .into_iter()
            .map(|(date, (total, blocked, masked, warned))| ViolationTrendPoint { date, total, blocked, masked, warned })
            .collect();

        Ok((trends, start_date, end_date))
    }

    pub async fn violations_by_type(
        &self,
        tenant_id: Option<&str>,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<Vec<TypeBreakdownEntry>, AuditError> {
        let filter = LogListFilter {
            tenant_id: tenant_id.map(str::to_string),
            start_date,
            end_date,
            has_risk_flags: Some(true),
            limit: i64::MAX,
            ..Default::default()
        };

        let mut qb = QueryBuilder::new(
            "SELECT id, tenant_id, app_id, user_id, model, provider, prompt_fingerprint,
                    token_count_input, token_count_output, latency_ms, risk_flags, metadata, created_at
             FROM audit_logs WHERE 1=1",
        );
        push_filters(&mut qb, &filter);
        let rows = qb.build_query_as::<AuditLogRow>().fetch_all(&self.pool).await?;

        let mut counts: BTreeMap<String, (i64, i64, i64, i64)> = BTreeMap::new();
        for row in &rows {
            let action = row.action();
            for pii_type in row.risk_flags_vec() {
                let entry = counts.entry(pii_type).or_insert((0, 0, 0, 0));
                entry.0 += 1;
                match action.as_str() {
                    "blocked" => entry.1 += 1,
                    "masked" => entry.2 += 1,
                    "warned" => entry.3 += 1,
                    _ => {}
                }
            }
        }

        let mut breakdown: Vec<TypeBreakdownEntry> = counts
            .into_iter()
            .map(|(pii_type, (total, blocked, masked, warned))| TypeBreakdownEntry { pii_type, total, blocked, masked, warned })
            .collect();
        breakdown.sort_by(|a, b| b.total.cmp(&a.total));
        Ok(breakdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuditLogCreate;
    use serde_json::Map;
    use sqlx::PgPool;

    fn sample_log(tenant_id: &str, app_id: &str, risk_flags: Vec<&str>, action: &str) -> AuditLogCreate {
        let mut metadata = Map::new();
        metadata.insert("action".to_string(), serde_json::json!(action));
        AuditLogCreate {
            id: None,
            tenant_id: tenant_id.to_string(),
            app_id: app_id.to_string(),
            user_id: Some("user-1".to_string()),
            model: "gpt-4o".to_string(),
            provider: "openai".to_string(),
            prompt_fingerprint: "fp".to_string(),
            token_count_input: Some(10),
            token_count_output: Some(20),
            latency_ms: Some(100),
            risk_flags: risk_flags.into_iter().map(str::to_string).collect(),
            metadata,
        }
    }

    #[sqlx::test]
    async fn insert_and_get_round_trip(pool: PgPool) {
        let db = AuditDb::from_pool(pool);
        let inserted = db.insert(sample_log("tenant-a", "app-1", vec!["EMAIL"], "masked")).await.unwrap();
        let fetched = db.get(inserted.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, inserted.id);
        assert_eq!(fetched.tenant_id, "tenant-a");
        assert_eq!(fetched.risk_flags_vec(), vec!["EMAIL".to_string()]);
        assert_eq!(fetched.action(), "masked");
    }

    #[sqlx::test]
    async fn insert_is_idempotent_on_retry_with_same_id(pool: PgPool) {
        let db = AuditDb::from_pool(pool);
        let id = Uuid::new_v4();
        let mut log = sample_log("tenant-a", "app-1", vec!["SSN"], "blocked");
        log.id = Some(id);

        let first = db.insert(log.clone()).await.unwrap();
        let second = db.insert(log).await.unwrap();
        assert_eq!(first.id, second.id);

        let (rows, total) = db.list(&LogListFilter { tenant_id: Some("tenant-a".to_string()), ..Default::default() }).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows.len(), 1);
    }

    #[sqlx::test]
    async fn list_filters_by_tenant(pool: PgPool) {
        let db = AuditDb::from_pool(pool);
        db.insert(sample_log("tenant-a", "app-1", vec![], "allowed")).await.unwrap();
        db.insert(sample_log("tenant-b", "app-1", vec![], "allowed")).await.unwrap();

        let (rows, total) = db.list(&LogListFilter { tenant_id: Some("tenant-a".to_string()), ..Default::default() }).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].tenant_id, "tenant-a");
    }

    #[sqlx::test]
    async fn stats_aggregates_counts(pool: PgPool) {
        let db = AuditDb::from_pool(pool);
        db.insert(sample_log("tenant-a", "app-1", vec!["EMAIL"], "masked")).await.unwrap();
        db.insert(sample_log("tenant-a", "app-2", vec![], "allowed")).await.unwrap();

        let stats = db.stats(Some("tenant-a"), None, None).await.unwrap();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.unique_apps, 2);
        assert_eq!(stats.requests_with_risk_flags, 1);
        assert_eq!(stats.total_tokens_input, 20);
    }

    #[sqlx::test]
    async fn violations_summary_buckets_by_severity_and_action(pool: PgPool) {
        let db = AuditDb::from_pool(pool);
        db.insert(sample_log("tenant-a", "app-1", vec!["PAN"], "blocked")).await.unwrap();
        db.insert(sample_log("tenant-a", "app-1", vec!["BANK_ACCOUNT"], "masked")).await.unwrap();
        db.insert(sample_log("tenant-a", "app-1", vec![], "allowed")).await.unwrap();

        let summary = db.violations_summary(Some("tenant-a"), None, None, None).await.unwrap();
        assert_eq!(summary.total_violations, 2);
        assert_eq!(summary.total_blocked, 1);
        assert_eq!(summary.total_masked, 1);
        assert_eq!(summary.by_severity.get("critical"), Some(&1));
        assert_eq!(summary.by_severity.get("medium"), Some(&1));
    }

    #[sqlx::test]
    async fn violation_trends_groups_by_day(pool: PgPool) {
        let db = AuditDb::from_pool(pool);
        db.insert(sample_log("tenant-a", "app-1", vec!["EMAIL"], "masked")).await.unwrap();

        let (trends, start, end) = db.violation_trends(Some("tenant-a"), 7).await.unwrap();
        assert!(start < end);
        assert_eq!(trends.len(), 1);
        assert_eq!(trends[0].total, 1);
        assert_eq!(trends[0].masked, 1);
    }
}

fn push_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, filter: &'a LogListFilter) {
    if let Some(tenant_id) = &filter.tenant_id {
        qb.push(" AND tenant_id = ").push_bind(tenant_id);
    }
    if let Some(app_id) = &filter.app_id {
        qb.push(" AND app_id = ").push_bind(app_id);
    }
    if let Some(user_id) = &filter.user_id {
        qb.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(model) = &filter.model {
        qb.push(" AND model = ").push_bind(model);
    }
    if let Some(provider) = &filter.provider {
        qb.push(" AND provider = ").push_bind(provider);
    }
    if let Some(start_date) = &filter.start_date {
        qb.push(" AND created_at >= ").push_bind(start_date);
    }
    if let Some(end_date) = &filter.end_date {
        qb.push(" AND created_at <= ").push_bind(end_date);
    }
    match filter.has_risk_flags {
        Some(true) => {
            qb.push(" AND jsonb_array_length(risk_flags) > 0");
        }
        Some(false) => {
            qb.push(" AND jsonb_array_length(risk_flags) = 0");
        }
        None => {}
    }
}
