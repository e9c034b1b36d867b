//! Parsed view of a completion request body.
//!
//! The gateway never deserializes the full request: it only needs `model` to
//! pick a backend and `stream` to pick a relay mode. The body is forwarded
//! byte-for-byte regardless of what this parse finds.

use serde_json::Value;

/// What the gateway could read out of a completion request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionBody {
    /// Empty, not JSON, or JSON that is not an object.
    Malformed,
    /// A JSON object. Fields of the wrong type are treated as absent.
    WellFormed {
        model: Option<String>,
        stream: Option<bool>,
    },
}

impl CompletionBody {
    /// Parse raw request bytes.
    pub fn parse(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(map)) => CompletionBody::WellFormed {
                model: map.get("model").and_then(Value::as_str).map(str::to_string),
                stream: map.get("stream").and_then(Value::as_bool),
            },
            _ => CompletionBody::Malformed,
        }
    }

    /// Requested model name, if the body named one.
    pub fn model(&self) -> Option<&str> {
        match self {
            CompletionBody::WellFormed { model, .. } => model.as_deref(),
            CompletionBody::Malformed => None,
        }
    }

    /// Whether the client asked for a streamed response.
    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            CompletionBody::WellFormed {
                stream: Some(true),
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_and_stream() {
        let body = CompletionBody::parse(br#"{"model":"alias-x","stream":true,"messages":[]}"#);
        assert_eq!(body.model(), Some("alias-x"));
        assert!(body.is_streaming());
    }

    #[test]
    fn test_missing_fields_are_well_formed() {
        let body = CompletionBody::parse(br#"{"prompt":"hi"}"#);
        assert_eq!(
            body,
            CompletionBody::WellFormed {
                model: None,
                stream: None
            }
        );
        assert!(!body.is_streaming());
    }

    #[test]
    fn test_wrong_field_types_count_as_absent() {
        let body = CompletionBody::parse(br#"{"model":42,"stream":"yes"}"#);
        assert_eq!(
            body,
            CompletionBody::WellFormed {
                model: None,
                stream: None
            }
        );
    }

    #[test]
    fn test_unparseable_body_is_malformed() {
        assert_eq!(CompletionBody::parse(b"{not json"), CompletionBody::Malformed);
        assert_eq!(CompletionBody::parse(b""), CompletionBody::Malformed);
        assert_eq!(CompletionBody::parse(b"[1,2]"), CompletionBody::Malformed);
        assert_eq!(CompletionBody::Malformed.model(), None);
    }
}
