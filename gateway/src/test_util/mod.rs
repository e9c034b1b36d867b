//! Helpers shared by unit and integration tests.

use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::gateway::{BackendDiscovery, BackendRecord};
use crate::AppState;

/// In-memory discovery; records are changed explicitly instead of via files.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    records: Mutex<Vec<BackendRecord>>,
}

impl StaticDiscovery {
    pub fn new(records: Vec<BackendRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    pub fn set(&self, records: Vec<BackendRecord>) {
        *self.records.lock().unwrap() = records;
    }

    pub fn remove(&self, short_name: &str) {
        self.records
            .lock()
            .unwrap()
            .retain(|r| r.short_name != short_name);
    }
}

impl BackendDiscovery for StaticDiscovery {
    fn list(&self) -> Vec<BackendRecord> {
        let mut records = self.records.lock().unwrap().clone();
        records.sort_by(|a, b| a.short_name.cmp(&b.short_name));
        records
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.logging.level = "debug".to_string();
    config.gate.max_queue_depth = 4;
    config.gate.keepalive_interval_secs = 1;
    config.timeouts.long_call_secs = 30;
    config.timeouts.monitor_secs = 2;
    config
}

/// State over a fixed set of backends, default test config, no API key.
pub fn test_state(records: Vec<BackendRecord>) -> AppState {
    create_test_state(test_config(), Arc::new(StaticDiscovery::new(records)), None)
}

pub fn create_test_state(
    config: Config,
    discovery: Arc<dyn BackendDiscovery>,
    api_key: Option<&str>,
) -> AppState {
    AppState::new(config, discovery, api_key.map(String::from))
        .expect("Failed to build HTTP client")
}
