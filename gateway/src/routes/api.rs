//! Native surface: `/api/models` and `/api/<name>/<rest>` routing.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use gateway_common::ModelListing;

use super::forward;
use crate::error::Result;
use crate::gateway::PathRoute;
use crate::AppState;

fn listings(state: &AppState) -> Vec<ModelListing> {
    state
        .router
        .backends()
        .into_iter()
        .map(|record| ModelListing {
            queue_depth: state.gates.depth(&record.short_name),
            name: record.short_name,
            model_alias: record.model_alias,
            port: record.port,
            process_id: record.process_id,
        })
        .collect()
}

/// GET /api/models - Live backends with their queue depth
async fn list_models(State(state): State<Arc<AppState>>) -> Json<Vec<ModelListing>> {
    Json(listings(&state))
}

/// ANY /api/* - Route by backend name prefix, else to the default backend
async fn proxy_api(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let api_path = path_and_query.strip_prefix("/api").unwrap_or(path_and_query);

    match state.router.resolve_path(api_path) {
        PathRoute::Listing => Ok(Json(listings(&state)).into_response()),
        PathRoute::Upstream(target) => forward::dispatch(&state, target, method, headers, body).await,
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/models", get(list_models))
        .route("/api/", any(proxy_api))
        .route("/api/*rest", any(proxy_api))
        .with_state(state)
}
