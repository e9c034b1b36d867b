//! Error types for the gateway.

use axum::http::header::{CONTENT_TYPE, RETRY_AFTER};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use gateway_common::ErrorBody;

/// Seconds a client is told to wait after a queue-full rejection.
pub const RETRY_AFTER_SECS: u64 = 5;

/// Failures surfaced to gateway clients.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Model '{model_key}' is busy: {depth} requests already queued, retry later")]
    AdmissionRejected { model_key: String, depth: usize },

    #[error("Missing or invalid API key")]
    AuthRejected,

    #[error("No model backend is running")]
    RouteUnavailable,

    #[error("Inference in progress, backend did not answer in time ({0}); retry shortly")]
    UpstreamTimeout(String),

    #[error("Backend returned HTTP {status}")]
    UpstreamHttp { status: StatusCode, body: Bytes },

    #[error("Backend unreachable: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Classify a failed backend call.
    pub fn from_upstream(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::UpstreamTimeout(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }

    /// Machine-checkable type reported in error payloads.
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::AdmissionRejected { .. } => "queue_full",
            GatewayError::AuthRejected => "unauthorized",
            GatewayError::RouteUnavailable => "no_backend",
            GatewayError::UpstreamTimeout(_) => "upstream_timeout",
            GatewayError::UpstreamHttp { .. } => "upstream_error",
            GatewayError::Transport(_) => "bad_gateway",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// Human-readable message; for backend errors this is the backend's own body.
    pub fn message(&self) -> String {
        match self {
            GatewayError::UpstreamHttp { body, .. } => String::from_utf8_lossy(body).into_owned(),
            other => other.to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            GatewayError::AdmissionRejected { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::AuthRejected => StatusCode::UNAUTHORIZED,
            GatewayError::RouteUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamHttp { status, .. } => *status,
            GatewayError::Transport(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            // Backend errors pass through untouched.
            GatewayError::UpstreamHttp { body, .. } => {
                (status, [(CONTENT_TYPE, "application/json")], body).into_response()
            }
            GatewayError::AdmissionRejected { .. } => {
                let body = Json(ErrorBody::new(self.error_type(), self.to_string()));
                (status, [(RETRY_AFTER, RETRY_AFTER_SECS.to_string())], body).into_response()
            }
            other => {
                let body = Json(ErrorBody::new(other.error_type(), other.to_string()));
                (status, body).into_response()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
