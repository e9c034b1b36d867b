//! Optional bearer-key authentication.

mod api_key;

pub use api_key::{check_bearer, load_api_key, require_api_key, AuthError};
