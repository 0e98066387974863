/// Observability endpoints
///
/// `/health` is a cheap liveness summary for load balancers; `/metrics`
/// returns the full stats document for scraping.
use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::{
    gateway::{metrics::GatewayMetricsSnapshot, ConnectionSnapshot, HealthStats},
    webserver::state::AppState,
};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub connected: usize,
    pub authenticated: usize,
    pub channels: usize,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub health: HealthStats,
    pub gateway: GatewayMetricsSnapshot,
    pub connections: Vec<ConnectionSnapshot>,
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.uptime_seconds(),
        connected: state.gateway.connection_count(),
        authenticated: state.gateway.authenticated_count(),
        channels: state.gateway.registry().channel_count(),
    })
}

/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        health: state.monitor.stats(),
        gateway: state.gateway.metrics(),
        connections: state.gateway.connection_snapshots(),
    })
}
