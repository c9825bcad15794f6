//! Typed gateway errors (C-wide §7): one variant per error category the
//! enforcement orchestrator and HTTP layer need to distinguish, each mapped
//! to a specific response shape at the edge.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request body is not valid JSON: {0}")]
    InvalidRequestBody(String),

    #[error("streaming requests are not supported")]
    StreamingNotSupported,

    #[error("request blocked by policy: {reason}")]
    PolicyBlocked {
        code: &'static str,
        reason: String,
        violations: Vec<String>,
        request_id: uuid::Uuid,
    },

    #[error("upstream provider error: {0}")]
    Provider(#[from] crate::providers::ProviderError),

    #[error("no provider configured for '{0}'")]
    UnknownProvider(String),

    #[error("policy document could not be loaded: {0}")]
    PolicyLoad(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            GatewayError::InvalidRequestBody(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            GatewayError::StreamingNotSupported => (StatusCode::BAD_REQUEST, "streaming_not_supported"),
            GatewayError::PolicyBlocked { .. } => (StatusCode::FORBIDDEN, "policy_violation"),
            GatewayError::Provider(crate::providers::ProviderError::Timeout) => {
                (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout")
            }
            GatewayError::Provider(crate::providers::ProviderError::Transport(_)) => {
                (StatusCode::BAD_GATEWAY, "upstream_error")
            }
            GatewayError::UnknownProvider(_) => (StatusCode::INTERNAL_SERVER_ERROR, "unknown_provider"),
            GatewayError::PolicyLoad(_) => (StatusCode::INTERNAL_SERVER_ERROR, "policy_load_error"),
            GatewayError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = match &self {
            GatewayError::PolicyBlocked {
                code,
                reason,
                violations,
                request_id,
            } => json!({
                "error": {
                    "type": "policy_violation",
                    "code": code,
                    "message": reason,
                    "violations": violations,
                    "request_id": request_id,
                }
            }),
            other => json!({
                "error": code,
                "message": other.to_string(),
            }),
        };

        (status, axum::Json(body)).into_response()
    }
}
