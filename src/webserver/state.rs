/// Shared application state for the webserver
///
/// Holds the gateway components that route handlers need.
use std::sync::Arc;

use crate::gateway::{BroadcastDispatcher, Gateway, HealthMonitor};

/// Shared application state passed to all route handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,

    /// Producer entry point, exposed so embedders can publish through the state
    pub dispatcher: Arc<BroadcastDispatcher>,

    pub monitor: Arc<HealthMonitor>,

    /// Server startup time
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        gateway: Arc<Gateway>,
        dispatcher: Arc<BroadcastDispatcher>,
        monitor: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            gateway,
            dispatcher,
            monitor,
            startup_time: chrono::Utc::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        (chrono::Utc::now() - self.startup_time)
            .num_seconds()
            .max(0) as u64
    }
}
