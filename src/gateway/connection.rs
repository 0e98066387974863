/// Per-connection state
///
/// A `Connection` is created by `Gateway::accept` and shared (`Arc`) between
/// the gateway, the transport task and the health monitor. All mutable
/// state sits behind its own small lock so no caller holds more than one.
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio::time::Instant;

use super::auth::{AuthState, Identity};
use super::health::ConnectionHealth;
use super::message::Envelope;
use super::metrics::{ConnectionMetrics, ConnectionMetricsSnapshot};
use super::queue::{OutboundQueue, PushOutcome};
use super::rate_limit::{Admission, RateLimitState, RateLimiter};
use super::ConnectionId;
use crate::errors::DisconnectReason;

pub struct Connection {
    id: ConnectionId,
    connected_at: DateTime<Utc>,
    /// Unauthenticated connections are closed after this instant
    auth_deadline: Instant,
    auth: RwLock<AuthState>,
    rate: Mutex<RateLimitState>,
    health: Mutex<ConnectionHealth>,
    queue: OutboundQueue,
    metrics: ConnectionMetrics,
    closed: AtomicBool,
    close_reason: Mutex<Option<DisconnectReason>>,
    close_notify: Notify,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        now: Instant,
        auth_deadline: Instant,
        limiter: &RateLimiter,
        queue_capacity: usize,
    ) -> Self {
        Self {
            id,
            connected_at: Utc::now(),
            auth_deadline,
            auth: RwLock::new(AuthState::Unauthenticated),
            rate: Mutex::new(limiter.new_state(now)),
            health: Mutex::new(ConnectionHealth::new(now)),
            queue: OutboundQueue::new(queue_capacity),
            metrics: ConnectionMetrics::default(),
            closed: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            close_notify: Notify::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn auth_deadline(&self) -> Instant {
        self.auth_deadline
    }

    // =========================================================================
    // AUTHENTICATION
    // =========================================================================

    pub fn auth_state(&self) -> AuthState {
        self.auth.read().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.auth.read().identity().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.read().is_authenticated()
    }

    /// Transition to authenticated; false if it already was
    pub(crate) fn set_authenticated(&self, identity: Identity) -> bool {
        let mut auth = self.auth.write();
        if auth.is_authenticated() {
            return false;
        }
        *auth = AuthState::Authenticated(identity);
        true
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    pub(crate) fn admit(&self, limiter: &RateLimiter, now: Instant) -> Admission {
        let admission = limiter.admit(&mut self.rate.lock(), now);
        if admission != Admission::Allowed {
            self.metrics.inc_rate_limited();
        }
        admission
    }

    /// Any inbound frame counts as liveness
    pub fn record_activity(&self, now: Instant) {
        self.health.lock().record_activity(now);
    }

    pub(crate) fn health(&self) -> &Mutex<ConnectionHealth> {
        &self.health
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    pub(crate) fn enqueue(&self, envelope: Envelope) -> PushOutcome {
        let outcome = self.queue.push(envelope);
        match &outcome {
            PushOutcome::Queued => self.metrics.inc_sent(),
            PushOutcome::QueuedWithEviction { .. } => {
                self.metrics.inc_sent();
                self.metrics.inc_overflow();
            }
            PushOutcome::Dropped => self.metrics.inc_overflow(),
            PushOutcome::Closed => {}
        }
        self.metrics.observe_queue_size(self.queue.len());
        outcome
    }

    /// Next outbound message for the transport writer
    pub async fn next_outbound(&self) -> Option<Envelope> {
        self.queue.next().await
    }

    /// Next outbound message if one is ready
    pub fn next_outbound_now(&self) -> Option<Envelope> {
        self.queue.try_next()
    }

    /// Discard whatever the writer did not get to
    pub fn discard_pending(&self) -> usize {
        self.queue.clear()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn metrics(&self) -> &ConnectionMetrics {
        &self.metrics
    }

    // =========================================================================
    // CLOSE
    // =========================================================================

    /// Mark closed; only the first call wins
    pub(crate) fn close(&self, reason: DisconnectReason) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.close_reason.lock() = Some(reason);
        self.queue.close();
        self.close_notify.notify_waiters();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close_reason(&self) -> Option<DisconnectReason> {
        *self.close_reason.lock()
    }

    /// Resolves once the connection has been closed by anyone
    pub async fn closed(&self) {
        loop {
            let notified = self.close_notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    pub fn snapshot(&self, subscriptions: Vec<String>) -> ConnectionSnapshot {
        let identity = self.identity();
        ConnectionSnapshot {
            id: self.id,
            connected_at: self.connected_at,
            user_id: identity.as_ref().map(|i| i.user_id.clone()),
            role: identity.map(|i| i.role.to_string()),
            subscriptions,
            queue_len: self.queue.len(),
            idle_secs: self.health.lock().seconds_since_activity(Instant::now()),
            metrics: self.metrics.snapshot(),
        }
    }
}

/// Serializable view of one connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub connected_at: DateTime<Utc>,
    pub user_id: Option<String>,
    pub role: Option<String>,
    pub subscriptions: Vec<String>,
    pub queue_len: usize,
    pub idle_secs: u64,
    pub metrics: ConnectionMetricsSnapshot,
}
