use axum::{routing::get, Router};
use std::sync::Arc;

use crate::webserver::state::AppState;

pub mod status;
pub mod ws;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(status::health))
        .route("/metrics", get(status::metrics))
        .with_state(state)
}
