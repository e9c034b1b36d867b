//! Backend registry: discovers live model backends.
//!
//! Each backend drops a registration file `<short_name>.pid` into the run
//! directory when it starts:
//!
//! ```text
//! 48213          <- process id (required)
//! 8002           <- port (default 8001)
//! qwen3-30b-a3b  <- model alias (default: short name)
//! ```
//!
//! The directory is re-read on every call; nothing is cached. Files whose
//! process is gone are deleted on the way.

use std::fs;
use std::path::{Path, PathBuf};

/// Port assumed when a registration file has no port line.
pub const DEFAULT_BACKEND_PORT: u16 = 8001;

const RECORD_EXTENSION: &str = "pid";

/// A registered model backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRecord {
    /// Gateway-local identifier, also the model key used for gating.
    pub short_name: String,
    /// Process that owns the backend.
    pub process_id: i32,
    /// Loopback port the backend listens on.
    pub port: u16,
    /// Model name the backend answers to.
    pub model_alias: String,
}

impl BackendRecord {
    pub fn new(short_name: impl Into<String>, process_id: i32, port: u16) -> Self {
        let short_name = short_name.into();
        Self {
            model_alias: short_name.clone(),
            short_name,
            process_id,
            port,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.model_alias = alias.into();
        self
    }

    /// Parse the contents of a registration file.
    ///
    /// Returns `None` for malformed records: missing or non-positive pid, or a
    /// port line that is present but not a port number.
    pub fn parse(short_name: &str, contents: &str) -> Option<Self> {
        let mut lines = contents.trim().lines().map(str::trim);

        let process_id: i32 = lines.next()?.parse().ok()?;
        if process_id <= 0 {
            return None;
        }

        let port = match lines.next() {
            Some(line) if !line.is_empty() => line.parse().ok()?,
            _ => DEFAULT_BACKEND_PORT,
        };

        let model_alias = match lines.next() {
            Some(line) if !line.is_empty() => line.to_string(),
            _ => short_name.to_string(),
        };

        Some(Self {
            short_name: short_name.to_string(),
            process_id,
            port,
            model_alias,
        })
    }
}

/// Source of live backend records.
///
/// Implementations must return a fresh view on every call; routing relies on
/// a pruned backend never being returned again.
pub trait BackendDiscovery: Send + Sync {
    /// Live backends. The first entry is the default backend.
    fn list(&self) -> Vec<BackendRecord>;
}

/// Discovery over a directory of `<name>.pid` registration files.
#[derive(Debug, Clone)]
pub struct PidDirDiscovery {
    run_dir: PathBuf,
}

impl PidDirDiscovery {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn read_record(path: &Path) -> Option<BackendRecord> {
        if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
            return None;
        }
        let short_name = path.file_stem()?.to_str()?;
        let contents = fs::read_to_string(path).ok()?;
        let record = BackendRecord::parse(short_name, &contents);
        if record.is_none() {
            tracing::debug!("Skipping malformed registration file {}", path.display());
        }
        record
    }
}

impl BackendDiscovery for PidDirDiscovery {
    fn list(&self) -> Vec<BackendRecord> {
        let entries = match fs::read_dir(&self.run_dir) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(record) = Self::read_record(&path) else {
                continue;
            };

            if !process_alive(record.process_id) {
                tracing::info!(
                    backend = %record.short_name,
                    pid = record.process_id,
                    "Pruning registration of exited backend"
                );
                // Another gateway or the launcher may have removed it already.
                let _ = fs::remove_file(&path);
                continue;
            }

            records.push(record);
        }

        records.sort_by(|a, b| a.short_name.cmp(&b.short_name));
        records
    }
}

/// Existence-only liveness probe: signal 0, no handshake with the backend.
#[cfg(unix)]
pub fn process_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        // Exists but belongs to another user.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn process_alive(pid: i32) -> bool {
    pid > 0
}
