//! # Metering API
//!
//! HTTP ingress for the metering sidecar: a small `axum` router exposing
//! `POST /report`, `GET /status`, and `GET /healthz`, plus the declarative
//! configuration document (`identities`, `metrics`, `endpoints`, `sources`,
//! `filters`) that `metering-service` loads at startup and turns into a
//! running pipeline via `metering_core::build_pipeline`.

pub mod config;
pub mod errors;
pub mod responses;

use axum::{
    extract::State,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use errors::ReportHandlerError;
use metering_core::{Input, StatsRecorder};
use responses::{HealthResponse, ReportAccepted, ReportRequest, StatusResponse};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::instrument;

pub use config::Config;
pub use errors::{ConfigError, ServiceError};

/// Server-level settings independent of the reporting configuration
/// document: bind address and middleware tuning.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: std::net::SocketAddr,
    pub max_body_size: usize,
    pub enable_compression: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: ([0, 0, 0, 0], 9090).into(),
            max_body_size: 1024 * 1024,
            enable_compression: true,
        }
    }
}

#[derive(Clone)]
struct AppState {
    pipeline: Arc<dyn Input>,
    stats: Arc<dyn StatsRecorder>,
}

/// Build the router. Exposed separately from [`start_server`] so tests can
/// drive it in-process without binding a socket.
pub fn build_router(pipeline: Arc<dyn Input>, stats: Arc<dyn StatsRecorder>, server: &ServerConfig) -> Router {
    let state = AppState { pipeline, stats };

    let mut router = Router::new()
        .route("/report", post(handle_report))
        .route("/status", get(handle_status))
        .route("/healthz", get(handle_healthz))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(server.max_body_size));

    if server.enable_compression {
        router = router.layer(CompressionLayer::new());
    }

    router
}

/// Build the router and serve it on `server.bind_address` until the
/// returned future is dropped or the listener errors.
pub async fn start_server(
    server: ServerConfig,
    pipeline: Arc<dyn Input>,
    stats: Arc<dyn StatsRecorder>,
) -> Result<(), ServiceError> {
    let router = build_router(pipeline, stats, &server);
    let listener = tokio::net::TcpListener::bind(server.bind_address)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: server.bind_address.to_string(),
            message: e.to_string(),
        })?;

    tracing::info!(address = %server.bind_address, "metering ingress listening");

    axum::serve(listener, router)
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        })
}

#[instrument(skip(state, body), fields(metric = %body.name))]
async fn handle_report(
    State(state): State<AppState>,
    Json(body): Json<ReportRequest>,
) -> impl IntoResponse {
    match body.into_metric_report() {
        Ok(report) => match state.pipeline.add_report(report).await {
            Ok(()) => Json(ReportAccepted { accepted: true }).into_response(),
            Err(err) => ReportHandlerError::from(err).into_response(),
        },
        Err(err) => err.into_response(),
    }
}

async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        snapshot: state.stats.snapshot(),
    })
}

async fn handle_healthz() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
