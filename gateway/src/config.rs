//! Configuration for the gateway.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Where backends register themselves and how to reach them.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendsConfig {
    /// Directory holding one `<name>.pid` registration file per backend.
    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,
    /// Host the backends listen on.
    #[serde(default = "default_backend_host")]
    pub host: String,
    /// Port used for `/api/*` calls when no backend is registered.
    #[serde(default = "default_backend_port")]
    pub default_port: u16,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            run_dir: default_run_dir(),
            host: default_backend_host(),
            default_port: default_backend_port(),
        }
    }
}

/// Per-model inference gate settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// Calls admitted per model (waiting or executing) before new ones are rejected.
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    /// Interval between keepalive frames on idle streaming responses.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: default_max_queue_depth(),
            keepalive_interval_secs: default_keepalive_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsConfig {
    /// Upper bound for non-streaming inference calls, including time spent queued.
    #[serde(default = "default_long_call_timeout")]
    pub long_call_secs: u64,
    /// Upper bound for monitoring calls (`health`, `metrics`, `slots`, `props`).
    #[serde(default = "default_monitor_timeout")]
    pub monitor_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            long_call_secs: default_long_call_timeout(),
            monitor_secs: default_monitor_timeout(),
        }
    }
}

/// Bearer key settings. No key means auth is disabled.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Key file; only its first line is used.
    #[serde(default = "default_api_key_file")]
    pub api_key_file: PathBuf,
    /// Inline key, takes precedence over the file.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key_file: default_api_key_file(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8888
}
fn default_run_dir() -> PathBuf {
    PathBuf::from("run")
}
fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}
fn default_backend_port() -> u16 {
    8001
}
fn default_max_queue_depth() -> usize {
    8
}
fn default_keepalive_interval() -> u64 {
    10
}
fn default_long_call_timeout() -> u64 {
    3600
}
fn default_monitor_timeout() -> u64 {
    8
}
fn default_api_key_file() -> PathBuf {
    PathBuf::from(".api-key")
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Environment variables understood by the older launcher scripts.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("UI_PORT", "server.port"),
    ("LLAMA_PORT", "backends.default_port"),
    ("API_PROXY_TIMEOUT", "timeouts.long_call_secs"),
    ("MONITOR_PROXY_TIMEOUT", "timeouts.monitor_secs"),
];

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Legacy launcher variables (`UI_PORT`, `LLAMA_PORT`, `API_PROXY_TIMEOUT`, `MONITOR_PROXY_TIMEOUT`)
    /// 2. Environment variables (GATEWAY__SECTION__KEY format)
    /// 3. gateway.toml file (if present)
    /// 4. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = ConfigLoader::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("backends.default_port", default_backend_port() as i64)?
            .set_default("gate.max_queue_depth", default_max_queue_depth() as i64)?
            .set_default("timeouts.long_call_secs", default_long_call_timeout() as i64)?
            .set_default("timeouts.monitor_secs", default_monitor_timeout() as i64)?
            .add_source(File::with_name("gateway").required(false))
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            );

        for (var, key) in LEGACY_ENV {
            builder = builder.set_override_option(*key, env::var(var).ok())?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.gate.keepalive_interval_secs)
    }

    pub fn long_call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.long_call_secs)
    }

    pub fn monitor_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.monitor_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            backends: BackendsConfig::default(),
            gate: GateConfig::default(),
            timeouts: TimeoutsConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
