//! Error types for the HTTP ingress and configuration layer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use metering_core::{ClosedError, PipelineError, ValidationError};
use tracing::{error, warn};

/// Failures surfaced while handling `POST /report`.
///
/// Maps onto HTTP status codes the way the pipeline's own error categories
/// split retryable from non-retryable: a malformed report is the client's
/// fault (`400`), a pipeline mid-shutdown is transient (`503`), anything
/// else is a bug (`500`).
#[derive(Debug, thiserror::Error)]
pub enum ReportHandlerError {
    #[error("invalid report: {0}")]
    Invalid(#[from] ValidationError),

    #[error("malformed report body: {0}")]
    Malformed(String),

    #[error("service is shutting down")]
    Closed(#[from] ClosedError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<PipelineError> for ReportHandlerError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(e) => Self::Invalid(e),
            PipelineError::Closed(e) => Self::Closed(e),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ReportHandlerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Invalid(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Self::Malformed(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Self::Closed(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            Self::Internal(message) => {
                error!(error = %message, "unhandled error processing report");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        if status == StatusCode::SERVICE_UNAVAILABLE {
            warn!("rejected report: service is shutting down");
        }
        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

/// Errors starting or running the HTTP ingress server.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("server failed: {message}")]
    ServerFailed { message: String },

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("failed to build pipeline: {0}")]
    PipelineBuild(#[from] metering_core::BuildError),

    #[error("failed to initialize state directory: {0}")]
    StateInit(String),
}

/// Configuration document errors, one variant per validation rule in
/// [`crate::config::Config::validate`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("identity '{name}' is declared more than once")]
    DuplicateIdentity { name: String },

    #[error("identity '{name}' has an empty credential")]
    EmptyCredential { name: String },

    #[error("metric '{name}' is declared more than once")]
    DuplicateMetric { name: String },

    #[error("metric '{name}' must declare exactly one of aggregation or passthrough mode")]
    AmbiguousMetricMode { name: String },

    #[error("metric '{name}' has a non-positive buffer_seconds")]
    InvalidBufferSeconds { name: String },

    #[error("metric '{metric}' references undefined endpoint '{endpoint}'")]
    UndefinedEndpoint { metric: String, endpoint: String },

    #[error("endpoint '{name}' is declared more than once")]
    DuplicateEndpoint { name: String },

    #[error("endpoint '{name}' references undefined identity '{identity}'")]
    UndefinedIdentity { name: String, identity: String },

    #[error("source references undefined metric '{metric}'")]
    UndefinedSourceMetric { metric: String },

    #[error("source for metric '{metric}' has value type {actual} but metric expects {expected}")]
    SourceValueTypeMismatch {
        metric: String,
        expected: String,
        actual: String,
    },

    #[error("heartbeat source for metric '{metric}' has a non-positive interval_seconds")]
    InvalidInterval { metric: String },
}
