pub mod config;
pub mod routes;
pub mod auth;
pub mod error;
pub mod logging;
pub mod gateway;
pub mod test_util;

pub use config::Config;
pub use error::{GatewayError, Result};
pub use gateway::{BackendDiscovery, BackendRecord, GateRegistry, ModelRouter, PidDirDiscovery};

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::{middleware, Router};

/// Largest request body accepted (long prompts, images).
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Maps requests to live backends.
    pub router: ModelRouter,
    /// One inference gate per model key.
    pub gates: GateRegistry,
    /// Backend client. Timeouts are set per request by tier.
    pub http_client: reqwest::Client,
    /// Gateway key; `None` disables authentication.
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(
        config: Config,
        discovery: Arc<dyn BackendDiscovery>,
        api_key: Option<String>,
    ) -> std::result::Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        let router = ModelRouter::new(
            discovery,
            &config.backends.host,
            config.backends.default_port,
        );
        let gates = GateRegistry::new(config.gate.max_queue_depth);

        Ok(Self {
            config,
            router,
            gates,
            http_client,
            api_key,
        })
    }
}

/// Build the full HTTP surface: every route behind the optional bearer check.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::health::router())
        .merge(routes::api::router(state.clone()))
        .merge(routes::compat::router(state.clone()))
        .layer(middleware::from_fn_with_state(state, auth::require_api_key))
        .layer(middleware::from_fn(logging::request_logger))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
