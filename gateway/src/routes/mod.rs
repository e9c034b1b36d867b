pub mod api;
pub mod compat;
pub mod forward;
pub mod health;
