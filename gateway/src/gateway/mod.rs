//! Gateway core: routing model calls to local llama-server backends.
//!
//! This module provides:
//! - Backend registry over the run directory
//! - Router that maps paths and request bodies to backends
//! - Per-model inference gates with bounded queues
//! - Pass-through proxying and the keepalive stream relay

pub mod gate;
pub mod proxy;
mod registry;
pub mod relay;
pub mod router;

pub use gate::{ExecutionLease, GateRegistry, InferenceGate, QueueTicket};
pub use registry::{process_alive, BackendDiscovery, BackendRecord, PidDirDiscovery, DEFAULT_BACKEND_PORT};
pub use router::{is_gated_path, is_monitor_path, ModelRouter, PathRoute, UpstreamTarget};
