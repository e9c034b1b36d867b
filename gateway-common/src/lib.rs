//! Gateway common types
//!
//! Wire types shared by the gateway handlers and its tests.

pub mod completion;
pub mod protocol;

pub use completion::CompletionBody;
pub use protocol::{ErrorBody, ErrorDetail, ModelListing, ModelObject, ModelsResponse};
