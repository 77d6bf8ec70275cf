//! HTTP + SSE surface of the server.

pub mod auth;
pub mod routes;
pub mod tasks;
pub mod types;

pub use routes::{app, build_state, serve, AppState};
