//! Request routing: picks the backend, upstream path and model key.

use std::sync::Arc;

use gateway_common::CompletionBody;

use super::{BackendDiscovery, BackendRecord};

/// Completion endpoints that must pass through the per-model gate.
const GATED_PATHS: &[&str] = &[
    "completion",
    "completions",
    "chat/completions",
    "v1/completion",
    "v1/completions",
    "v1/chat/completions",
];

/// Endpoints a backend may block while it is busy evaluating.
const MONITOR_PATHS: &[&str] = &["health", "metrics", "slots", "props"];

/// Strip query string and leading slash.
fn clean_path(path: &str) -> &str {
    let path = path.split('?').next().unwrap_or_default();
    path.trim_start_matches('/')
}

/// Whether a call to `path` is an inference call that must be gated.
pub fn is_gated_path(path: &str) -> bool {
    GATED_PATHS.contains(&clean_path(path))
}

/// Whether `path` is a monitoring endpoint that gets the short timeout.
pub fn is_monitor_path(path: &str) -> bool {
    let path = clean_path(path);
    let path = path.strip_prefix("v1/").unwrap_or(path);
    MONITOR_PATHS.contains(&path)
}

/// A resolved upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    /// e.g. `http://127.0.0.1:8002`
    pub base_url: String,
    /// Path (and query) on the backend, always starting with `/`.
    pub path: String,
    /// Key of the gate guarding this backend.
    pub model_key: String,
}

impl UpstreamTarget {
    pub fn url(&self) -> String {
        format!("{}{}", self.base_url, self.path)
    }
}

/// Outcome of routing an `/api/...` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathRoute {
    /// `/api/models`, answered by the gateway itself.
    Listing,
    Upstream(UpstreamTarget),
}

/// Routes requests to registered backends.
///
/// Holds no routing state of its own: every decision reads the discovery
/// source again, so a pruned backend drops out immediately.
pub struct ModelRouter {
    discovery: Arc<dyn BackendDiscovery>,
    backend_host: String,
    default_port: u16,
}

impl ModelRouter {
    pub fn new(discovery: Arc<dyn BackendDiscovery>, backend_host: &str, default_port: u16) -> Self {
        Self {
            discovery,
            backend_host: backend_host.to_string(),
            default_port,
        }
    }

    /// Current live backends, default first.
    pub fn backends(&self) -> Vec<BackendRecord> {
        self.discovery.list()
    }

    fn base_url(&self, port: u16) -> String {
        format!("http://{}:{}", self.backend_host, port)
    }

    /// Target for `path` on a given backend.
    pub fn target(&self, record: &BackendRecord, path: &str) -> UpstreamTarget {
        UpstreamTarget {
            base_url: self.base_url(record.port),
            path: path.to_string(),
            model_key: record.short_name.clone(),
        }
    }

    /// Target for `path` on the default backend.
    ///
    /// Falls back to the configured default port when nothing is registered,
    /// so a manually started backend is still reachable.
    pub fn default_target(&self, path: &str) -> UpstreamTarget {
        match self.backends().first() {
            Some(record) => self.target(record, path),
            None => UpstreamTarget {
                base_url: self.base_url(self.default_port),
                path: path.to_string(),
                model_key: format!("port-{}", self.default_port),
            },
        }
    }

    /// Route an `/api` call. `api_path` is the path and query with `/api` removed.
    ///
    /// `/<short_name>/<rest>` goes to that backend as `/<rest>`; anything else
    /// goes to the default backend unchanged.
    pub fn resolve_path(&self, api_path: &str) -> PathRoute {
        let trimmed = api_path.trim_start_matches('/');
        if clean_path(trimmed) == "models" {
            return PathRoute::Listing;
        }

        let (head, rest) = match trimmed.split_once('/') {
            Some((head, rest)) => (head, Some(rest)),
            None => (trimmed, None),
        };

        let backends = self.backends();
        if let Some(record) = backends.iter().find(|r| r.short_name == head) {
            let path = format!("/{}", rest.unwrap_or_default());
            tracing::debug!(backend = %record.short_name, path = %path, "Routing by path prefix");
            return PathRoute::Upstream(self.target(record, &path));
        }

        let path = format!("/{}", trimmed);
        PathRoute::Upstream(match backends.first() {
            Some(record) => self.target(record, &path),
            None => self.default_target(&path),
        })
    }

    /// Pick the backend for a compatibility-surface call from its body.
    ///
    /// Match order: alias, then short name, then the default backend. Unknown
    /// or missing model names are not an error. `None` only when nothing is
    /// registered.
    pub fn resolve_body(&self, body: &CompletionBody) -> Option<BackendRecord> {
        let mut backends = self.backends();
        if backends.is_empty() {
            return None;
        }

        let index = body.model().and_then(|model| {
            backends
                .iter()
                .position(|r| r.model_alias == model)
                .or_else(|| backends.iter().position(|r| r.short_name == model))
        });

        match index {
            Some(i) => Some(backends.swap_remove(i)),
            None => {
                if let Some(model) = body.model() {
                    tracing::debug!("Unknown model '{}', using default backend", model);
                }
                Some(backends.swap_remove(0))
            }
        }
    }
}
