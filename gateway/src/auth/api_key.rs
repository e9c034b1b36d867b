use std::fs;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::config::AuthConfig;
use crate::error::GatewayError;
use crate::AppState;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingHeader,
    #[error("Invalid Authorization header format")]
    InvalidFormat,
    #[error("API key mismatch")]
    KeyMismatch,
}

/// Resolve the gateway key once at startup.
///
/// The inline key wins over the key file. Only the first line of the file is
/// read. A blank key, or a missing file, disables authentication.
pub fn load_api_key(config: &AuthConfig) -> Option<String> {
    let raw = match &config.api_key {
        Some(key) => key.clone(),
        None => match fs::read_to_string(&config.api_key_file) {
            Ok(contents) => contents.lines().next().unwrap_or_default().to_string(),
            Err(e) => {
                tracing::debug!(
                    "No API key file at {}: {}",
                    config.api_key_file.display(),
                    e
                );
                return None;
            }
        },
    };

    let key = raw.trim();
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

/// Check that `headers` carry exactly `Authorization: Bearer <key>`.
pub fn check_bearer(headers: &HeaderMap, key: &str) -> Result<(), AuthError> {
    let auth_header = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidFormat)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidFormat)?;

    if token == key {
        Ok(())
    } else {
        Err(AuthError::KeyMismatch)
    }
}

/// Middleware rejecting requests without the configured key.
///
/// A no-op when authentication is disabled.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(key) = state.api_key.as_deref() else {
        return next.run(request).await;
    };

    match check_bearer(request.headers(), key) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            tracing::debug!(path = %request.uri().path(), "Rejected request: {}", e);
            GatewayError::AuthRejected.into_response()
        }
    }
}
