//! JSON payloads exposed by the gateway.
//!
//! Two listing shapes exist side by side:
//!
//! - `/api/models` returns [`ModelListing`] entries, one per live backend,
//!   including its current queue depth.
//! - `/v1/models` returns the OpenAI-style [`ModelsResponse`] so that stock
//!   OpenAI clients can discover which model names resolve.

use serde::{Deserialize, Serialize};

/// One live backend as reported by `GET /api/models`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelListing {
    /// Gateway-local short name (the registration file stem).
    pub name: String,
    /// Model alias the backend registered itself under.
    pub model_alias: String,
    /// Loopback port of the backend.
    pub port: u16,
    /// Process id that owns the backend.
    pub process_id: i32,
    /// Calls currently admitted for this model (waiting or executing).
    pub queue_depth: usize,
}

/// Model entry in the OpenAI-compatible listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelObject {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

impl ModelObject {
    /// Entry for a locally served model.
    pub fn local(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: "model".to_string(),
            created: 0,
            owned_by: "local".to_string(),
        }
    }
}

/// Response from `GET /v1/models`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<ModelObject>,
}

impl ModelsResponse {
    pub fn list(data: Vec<ModelObject>) -> Self {
        Self {
            object: "list".to_string(),
            data,
        }
    }
}

/// Error payload for failures that originate in the gateway itself.
///
/// Errors returned by a backend are relayed untouched and never wrapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-checkable error type (e.g. `queue_full`).
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable description.
    pub message: String,
}

impl ErrorBody {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                error_type: error_type.into(),
                message: message.into(),
            },
        }
    }
}
