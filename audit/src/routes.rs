//! Audit Store read/write HTTP surface (C11): write endpoint the gateway's
//! Audit Emitter posts to, plus the query/aggregation/export endpoints the
//! read side exposes.

use crate::db::AuditDb;
use crate::error::AuditError;
use crate::models::{AuditLogCreate, AuditLogResponse, LogListFilter, PaginatedResponse};
use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use futures::stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use uuid::Uuid;

pub fn router(db: Arc<AuditDb>) -> Router {
    Router::new()
        .route("/api/v1/logs", axum::routing::post(create_log).get(list_logs))
        .route("/api/v1/logs/stats", axum::routing::get(stats))
        .route("/api/v1/logs/export/csv", axum::routing::get(export_csv))
        .route("/api/v1/logs/{id}", axum::routing::get(get_log))
        .route("/api/v1/violations", axum::routing::get(list_violations))
        .route("/api/v1/violations/summary", axum::routing::get(violations_summary))
        .route("/api/v1/violations/trends", axum::routing::get(violations_trends))
        .route("/api/v1/violations/by-type", axum::routing::get(violations_by_type))
        .route("/api/v1/reports/audit", axum::routing::get(audit_report_pdf))
        .with_state(db)
}

async fn create_log(
    State(db): State<Arc<AuditDb>>,
    Json(log): Json<AuditLogCreate>,
) -> Result<(StatusCode, Json<AuditLogResponse>), AuditError> {
    let row = db.insert(log).await?;
    Ok((StatusCode::CREATED, Json(row.into())))
}

async fn list_logs(
    State(db): State<Arc<AuditDb>>,
    Query(filter): Query<LogListFilter>,
) -> Result<Json<PaginatedResponse<AuditLogResponse>>, AuditError> {
    let (rows, total) = db.list(&filter).await?;
    let items: Vec<AuditLogResponse> = rows.into_iter().map(AuditLogResponse::from).collect();
    Ok(Json(PaginatedResponse::new(items, total, filter.page.max(1), filter.limit.clamp(1, 100))))
}

async fn get_log(State(db): State<Arc<AuditDb>>, Path(id): Path<String>) -> Result<Json<AuditLogResponse>, AuditError> {
    let id = Uuid::parse_str(&id).map_err(|_| AuditError::InvalidId)?;
    let row = db.get(id).await?.ok_or(AuditError::NotFound)?;
    Ok(Json(row.into()))
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    tenant_id: Option<String>,
    start_date: Option<chrono::DateTime<chrono::Utc>>,
    end_date: Option<chrono::DateTime<chrono::Utc>>,
}

async fn stats(State(db): State<Arc<AuditDb>>, Query(q): Query<StatsQuery>) -> Result<Json<crate::models::StatsResponse>, AuditError> {
    let stats = db.stats(q.tenant_id.as_deref(), q.start_date, q.end_date).await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
struct ViolationsListQuery {
    #[serde(flatten)]
    filter: LogListFilter,
    pii_type: Option<String>,
    action: Option<String>,
}

async fn list_violations(
    State(db): State<Arc<AuditDb>>,
    Query(q): Query<ViolationsListQuery>,
) -> Result<Json<Vec<crate::models::ViolationResponse>>, AuditError> {
    let violations = db.list_violations(&q.filter, q.pii_type.as_deref(), q.action.as_deref()).await?;
    Ok(Json(violations))
}

#[derive(Debug, Deserialize)]
struct SummaryQuery {
    tenant_id: Option<String>,
    app_id: Option<String>,
    start_date: Option<chrono::DateTime<chrono::Utc>>,
    end_date: Option<chrono::DateTime<chrono::Utc>>,
}

async fn violations_summary(
    State(db): State<Arc<AuditDb>>,
    Query(q): Query<SummaryQuery>,
) -> Result<Json<crate::models::ViolationSummary>, AuditError> {
    let summary = db.violations_summary(q.tenant_id.as_deref(), q.app_id.as_deref(), q.start_date, q.end_date).await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct TrendsQuery {
    tenant_id: Option<String>,
    #[serde(default = "default_trend_days")]
    days: i64,
}

fn default_trend_days() -> i64 {
    30
}

async fn violations_trends(State(db): State<Arc<AuditDb>>, Query(q): Query<TrendsQuery>) -> Result<Json<serde_json::Value>, AuditError> {
    let (trends, start_date, end_date) = db.violation_trends(q.tenant_id.as_deref(), q.days).await?;
    Ok(Json(serde_json::json!({
        "trends": trends,
        "period_days": q.days,
        "start_date": start_date,
        "end_date": end_date,
    })))
}

async fn violations_by_type(
    State(db): State<Arc<AuditDb>>,
    Query(q): Query<SummaryQuery>,
) -> Result<Json<serde_json::Value>, AuditError> {
    let breakdown = db.violations_by_type(q.tenant_id.as_deref(), q.start_date, q.end_date).await?;
    Ok(Json(serde_json::json!({ "by_type": breakdown })))
}

/// Streams matching logs as CSV with a timestamped filename. Mechanical
/// export, in scope; unlike the PDF endpoint below this isn't a stub. The
/// row ceiling is `AuditDb::EXPORT_ROW_LIMIT`, applied once inside
/// `list_for_export` — this handler doesn't impose its own.
async fn export_csv(State(db): State<Arc<AuditDb>>, Query(filter): Query<LogListFilter>) -> Result<Response, AuditError> {
    let rows = db.list_for_export(&filter).await?;

    let header_row = Bytes::from_static(b"id,tenant_id,app_id,user_id,model,provider,risk_flags,action,created_at\n");
    let data_rows = rows.into_iter().map(|row| {
        Bytes::from(format!(
            "{},{},{},{},{},{},\"{}\",{},{}\n",
            row.id,
            row.tenant_id,
            row.app_id,
            row.user_id.clone().unwrap_or_default(),
            row.model,
            row.provider,
            row.risk_flags_vec().join(";"),
            row.action(),
            row.created_at.to_rfc3339(),
        ))
    });
    let chunks = std::iter::once(header_row).chain(data_rows).map(Ok::<Bytes, Infallible>);
    let body = Body::from_stream(stream::iter(chunks));

    let filename = format!("audit-export-{}.csv", chrono::Utc::now().format("%Y%m%dT%H%M%SZ"));
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        body,
    )
        .into_response())
}

/// PDF report generation is an external collaborator this crate doesn't
/// own; the endpoint's contract (path, method, content type) is honored
/// with a minimal placeholder rather than a full rendering pipeline.
async fn audit_report_pdf() -> impl IntoResponse {
    (
        StatusCode::NOT_IMPLEMENTED,
        [(header::CONTENT_TYPE, "application/json")],
        Json(serde_json::json!({
            "detail": "PDF report rendering is not available in this deployment"
        })),
    )
}
