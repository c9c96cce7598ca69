pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod openapi;
pub mod password;
pub mod payments;
pub mod rate_limit;
pub mod repo;
pub mod routes;
pub mod security;
pub mod storage;

// Re-export commonly used items for tests / the binary
pub use routes::{config as configure, AppState};
pub use security::SecurityHeaders;
