use parking_lot::Mutex;
use serde::Serialize;
/// Gateway metrics collection
///
/// Per-connection and gateway-wide counters for health reporting.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::errors::DisconnectReason;

// ============================================================================
// CONNECTION METRICS
// ============================================================================

/// Per-connection counters (thread-safe)
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    /// Messages handed to the transport
    messages_sent: AtomicU64,

    /// Inbound frames received
    messages_received: AtomicU64,

    /// Messages lost to the outbound drop policy
    overflows: AtomicU64,

    /// Inbound messages rejected by the rate limiter
    rate_limited: AtomicU64,

    /// Peak outbound queue depth
    peak_queue_size: AtomicUsize,
}

impl ConnectionMetrics {
    pub fn inc_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_overflow(&self) {
        self.overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// Track the queue depth high-water mark
    pub fn observe_queue_size(&self, size: usize) {
        self.peak_queue_size.fetch_max(size, Ordering::Relaxed);
    }

    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ConnectionMetricsSnapshot {
        ConnectionMetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            peak_queue_size: self.peak_queue_size.load(Ordering::Relaxed),
        }
    }
}

/// Per-connection snapshot (serializable)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionMetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub overflows: u64,
    pub rate_limited: u64,
    pub peak_queue_size: usize,
}

// ============================================================================
// GATEWAY METRICS
// ============================================================================

/// Aggregate counters across all connections
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    /// Connections accepted (lifetime)
    total_connections: AtomicU64,

    /// Currently open connections
    active_connections: AtomicUsize,

    /// Successful authentications (lifetime)
    authentications: AtomicU64,

    /// Failed authentication attempts (lifetime)
    auth_failures: AtomicU64,

    /// Messages queued for delivery
    total_messages_sent: AtomicU64,

    /// Messages lost to the outbound drop policy
    total_overflows: AtomicU64,

    /// Inbound messages rejected by the rate limiter
    rate_limit_violations: AtomicU64,

    /// Disconnects by reason
    disconnects: Mutex<BTreeMap<DisconnectReason, u64>>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self, reason: DisconnectReason) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
        *self.disconnects.lock().entry(reason).or_insert(0) += 1;
    }

    pub fn authenticated(&self) {
        self.authentications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_failed(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self) {
        self.total_messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn overflow(&self) {
        self.total_overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rate_limit_violation(&self) {
        self.rate_limit_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GatewayMetricsSnapshot {
        GatewayMetricsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            authentications: self.authentications.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            total_messages_sent: self.total_messages_sent.load(Ordering::Relaxed),
            total_overflows: self.total_overflows.load(Ordering::Relaxed),
            rate_limit_violations: self.rate_limit_violations.load(Ordering::Relaxed),
            disconnects: self
                .disconnects
                .lock()
                .iter()
                .map(|(reason, count)| (reason.as_str().to_string(), *count))
                .collect(),
        }
    }
}

/// Gateway snapshot (serializable)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayMetricsSnapshot {
    pub total_connections: u64,
    pub active_connections: usize,
    pub authentications: u64,
    pub auth_failures: u64,
    pub total_messages_sent: u64,
    pub total_overflows: u64,
    pub rate_limit_violations: u64,
    pub disconnects: BTreeMap<String, u64>,
}

impl GatewayMetricsSnapshot {
    pub fn disconnects_for(&self, reason: DisconnectReason) -> u64 {
        self.disconnects.get(reason.as_str()).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_metrics() {
        let metrics = ConnectionMetrics::default();

        metrics.inc_sent();
        metrics.inc_sent();
        metrics.inc_overflow();
        metrics.observe_queue_size(10);
        metrics.observe_queue_size(20);
        metrics.observe_queue_size(15);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_sent, 2);
        assert_eq!(snapshot.overflows, 1);
        assert_eq!(snapshot.peak_queue_size, 20);
    }

    #[test]
    fn test_gateway_metrics() {
        let metrics = GatewayMetrics::new();

        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.message_sent();
        metrics.overflow();
        metrics.connection_closed(DisconnectReason::HeartbeatTimeout);
        metrics.connection_closed(DisconnectReason::HeartbeatTimeout);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_connections, 3);
        assert_eq!(snapshot.active_connections, 1);
        assert_eq!(snapshot.total_overflows, 1);
        assert_eq!(snapshot.disconnects_for(DisconnectReason::HeartbeatTimeout), 2);
        assert_eq!(snapshot.disconnects_for(DisconnectReason::AuthTimeout), 0);
    }
}
