//! Typed audit-store errors, mapped to HTTP status/response shape at the
//! edge. Database failures are internal by default; validation failures
//! (malformed UUID, missing record) get their own 4xx variants.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("invalid log id format")]
    InvalidId,

    #[error("audit log not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for AuditError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuditError::InvalidId => (StatusCode::BAD_REQUEST, self.to_string()),
            AuditError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AuditError::Database(e) => {
                tracing::error!(error = %e, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, axum::Json(json!({ "detail": message }))).into_response()
    }
}
