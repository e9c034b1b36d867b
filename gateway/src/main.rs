use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use model_gateway::auth::load_api_key;
use model_gateway::{app, AppState, BackendDiscovery, Config, PidDirDiscovery};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.logging.level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting model gateway");

    let discovery = PidDirDiscovery::new(&config.backends.run_dir);
    let backends = discovery.list();
    tracing::info!(
        "Watching {} for backend registrations ({} live)",
        discovery.run_dir().display(),
        backends.len()
    );
    for record in &backends {
        tracing::info!(
            backend = %record.short_name,
            alias = %record.model_alias,
            port = record.port,
            pid = record.process_id,
            "Backend registered"
        );
    }

    let api_key = load_api_key(&config.auth);
    if api_key.is_some() {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!("No API key configured, authentication disabled");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, Arc::new(discovery), api_key)?);

    tracing::info!(
        max_queue_depth = state.config.gate.max_queue_depth,
        keepalive_secs = state.config.gate.keepalive_interval_secs,
        long_call_secs = state.config.timeouts.long_call_secs,
        monitor_secs = state.config.timeouts.monitor_secs,
        "Inference gate settings"
    );
    tracing::info!("Routes:");
    tracing::info!("  GET  /health               gateway liveness");
    tracing::info!("  GET  /api/models           live backends with queue depth");
    tracing::info!("  ANY  /api/<name>/<path>    backend <name>, prefix stripped");
    tracing::info!("  ANY  /api/<path>           default backend");
    tracing::info!("  GET  /v1/models            OpenAI-style model list");
    tracing::info!("  POST /v1/chat/completions  routed by body model, gated");
    tracing::info!("  POST /v1/completions       routed by body model, gated");
    tracing::info!("  ANY  /v1/<path>            default backend");

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = app(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    tracing::info!("Listening on {}", addr);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
