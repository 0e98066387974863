//! HTTP/WebSocket surface of the gateway
//!
//! Axum serves the `/ws` upgrade plus `/health` and `/metrics`. All state
//! lives in the gateway components carried by `AppState`.

mod server;

pub mod routes;
pub mod state;

// Public API for starting/stopping the webserver
pub use server::{bind, build_app, serve, shutdown, start_server, wait_for_shutdown};
