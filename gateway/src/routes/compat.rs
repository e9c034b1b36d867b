//! OpenAI-compatible surface.
//!
//! Completion calls name their model in the body; the gateway picks the
//! backend from it and gates the call under that backend's short name.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, Uri},
    response::Response,
    routing::{any, get, post},
    Json, Router,
};
use gateway_common::{CompletionBody, ModelObject, ModelsResponse};

use super::forward;
use crate::error::{GatewayError, Result};
use crate::AppState;

fn path_and_query(uri: &Uri) -> &str {
    uri.path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path())
}

/// GET /v1/models - One entry per alias, plus the short name when it differs
async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    let mut data = Vec::new();
    for record in state.router.backends() {
        data.push(ModelObject::local(record.model_alias.as_str()));
        if record.short_name != record.model_alias {
            data.push(ModelObject::local(record.short_name));
        }
    }
    Json(ModelsResponse::list(data))
}

/// POST completions - Route by the body's `model`, gated per backend
async fn completions(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let parsed = CompletionBody::parse(&body);
    let record = state
        .router
        .resolve_body(&parsed)
        .ok_or(GatewayError::RouteUnavailable)?;
    let target = state.router.target(&record, path_and_query(&uri));
    forward::dispatch(&state, target, method, headers, body).await
}

/// ANY /v1/* - Everything else goes to the default backend
async fn proxy_v1(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let target = state.router.default_target(path_and_query(&uri));
    forward::dispatch(&state, target, method, headers, body).await
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(completions))
        .route("/v1/completions", post(completions))
        .route("/chat/completions", post(completions))
        .route("/completions", post(completions))
        .route("/v1/*rest", any(proxy_v1))
        .with_state(state)
}
