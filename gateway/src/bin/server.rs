//! compliance-gateway server binary: wires the orchestrator behind an axum
//! app exposing the chat-completions proxy and policy-inspection endpoints.

use std::sync::Arc;

use anyhow::Context;
use axum::error_handling::HandleErrorLayer;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use compliance_gateway::{
    Alerter, AuditEmitter, AzureOpenAiProvider, ChatCompletionRequest, Detector, GatewayError,
    OpenAiProvider, PolicyEngine, ProviderAdapter, Scanner, Settings,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::{buffer::BufferLayer, limit::RateLimitLayer, BoxError, ServiceBuilder};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct AppState {
    orchestrator: compliance_gateway::Orchestrator,
    policy_engine: Arc<PolicyEngine>,
    settings: Settings,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct IncomingChatRequest {
    model: Option<String>,
    messages: Vec<IncomingMessage>,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    user: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, Value>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();

    let policy_engine = Arc::new(PolicyEngine::from_file_or_default(settings.policy_file.clone()));
    let scanner = Scanner::new(Detector::new());

    let provider: Arc<dyn ProviderAdapter> = match settings.ai_provider {
        compliance_gateway::AiProvider::Azure => Arc::new(AzureOpenAiProvider::new(
            settings.azure_openai_endpoint.clone(),
            settings.azure_openai_api_key.clone(),
            settings.azure_openai_deployment.clone(),
            settings.azure_openai_api_version.clone(),
        )),
        compliance_gateway::AiProvider::OpenAi => {
            Arc::new(OpenAiProvider::new(settings.openai_api_key.clone()))
        }
    };

    let audit_emitter = Arc::new(AuditEmitter::new(settings.audit_service_url.clone()));

    let email_config = if settings.alert_email_enabled {
        Some(compliance_gateway::EmailConfig {
            smtp_host: settings.alert_email_smtp_host.clone(),
            smtp_port: settings.alert_email_smtp_port,
            smtp_user: settings.alert_email_smtp_user.clone(),
            smtp_password: settings.alert_email_smtp_password.clone(),
            from: settings.alert_email_from.clone(),
            to: settings.alert_email_to.clone(),
        })
        .filter(compliance_gateway::EmailConfig::is_usable)
    } else {
        None
    };
    let alerter = Arc::new(Alerter::new(settings.alert_slack_webhook.clone(), email_config));

    let orchestrator = compliance_gateway::Orchestrator::new(
        scanner,
        policy_engine.clone(),
        provider,
        audit_emitter,
        alerter,
        settings.clone(),
    );

    let state = Arc::new(AppState {
        orchestrator,
        policy_engine,
        settings,
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/policy", get(get_policy))
        .route("/v1/policy/reload", post(reload_policy))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|err: BoxError| async move {
                    (StatusCode::INTERNAL_SERVER_ERROR, format!("unhandled internal error: {err}"))
                }))
                .layer(BufferLayer::new(1024))
                .layer(RateLimitLayer::new(600, std::time::Duration::from_secs(60))),
        )
        .with_state(state.clone());

    let addr = format!("0.0.0.0:{}", state.settings.port);
    tracing::info!(%addr, "compliance gateway listening");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind gateway listener on {addr}"))?;
    axum::serve(listener, app).await.context("gateway server crashed")?;
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<IncomingChatRequest>,
) -> Response {
    let app_id = header_str(&headers, "x-app-key");
    let user_id = header_str(&headers, "x-user-id");
    let org_id = header_str(&headers, "x-org-id");

    let request_id = uuid::Uuid::new_v4();
    let request = ChatCompletionRequest {
        model: body.model,
        messages: body
            .messages
            .into_iter()
            .map(|m| compliance_gateway::ChatMessage { role: m.role, content: m.content })
            .collect(),
        stream: body.stream,
        extra: body.extra,
        body_user: body.user,
        app_id,
        user_id,
        org_id,
        request_id,
    };

    let request_id_header = HeaderValue::from_str(&request_id.to_string()).expect("uuid is valid header value");
    let mut response = match state.orchestrator.handle(request).await {
        Ok((body, status)) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
            (status, Json(body)).into_response()
        }
        Err(err) => err.into_response(),
    };
    response.headers_mut().insert("x-request-id", request_id_header);
    response
}

async fn get_policy(State(state): State<Arc<AppState>>) -> Json<Value> {
    let policy = state.policy_engine.current();
    Json(serde_json::json!({
        "name": policy.name,
        "version": policy.version,
        "description": policy.description,
        "rules": policy.rules,
        "org_overrides": policy.org_overrides.keys().collect::<Vec<_>>(),
    }))
}

async fn reload_policy(State(state): State<Arc<AppState>>) -> Result<Json<Value>, GatewayError> {
    let path = state.settings.policy_file.as_deref();
    state.policy_engine.reload(path);
    let policy = state.policy_engine.current();
    Ok(Json(serde_json::json!({
        "status": "success",
        "message": "Policy reloaded",
        "policy": {
            "name": policy.name,
            "version": policy.version,
            "description": policy.description,
        },
    })))
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v: &HeaderValue| v.to_str().ok())
        .map(|s| s.to_string())
}
