//! compliance-audit server binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use compliance_audit::{AuditDb, Settings};
use serde::Serialize;
use tower::{buffer::BufferLayer, limit::RateLimitLayer, BoxError, ServiceBuilder};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();

    let db = AuditDb::connect(&settings.database_url, settings.max_connections)
        .await
        .context("connect to audit database")?;
    db.migrate().await.context("run audit database migrations")?;
    let db = Arc::new(db);

    let app = Router::new()
        .route("/healthz", get(health))
        .merge(compliance_audit::routes::router(db))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|err: BoxError| async move {
                    (StatusCode::INTERNAL_SERVER_ERROR, format!("unhandled internal error: {err}"))
                }))
                .layer(BufferLayer::new(1024))
                .layer(RateLimitLayer::new(600, Duration::from_secs(60))),
        );

    let addr = format!("0.0.0.0:{}", settings.port);
    tracing::info!(%addr, "compliance audit store listening");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind audit listener on {addr}"))?;
    axum::serve(listener, app).await.context("audit server crashed")?;
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy", version: env!("CARGO_PKG_VERSION") })
}
