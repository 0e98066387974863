/// Connection gateway - lifecycle, authentication and inbound routing
///
/// The Gateway owns every live `Connection` and is the only component that
/// creates or destroys them. It manages:
/// - Accept / authenticate / disconnect
/// - Inbound rate limiting and request routing
/// - Non-blocking outbound delivery with per-connection backpressure
/// - Lifecycle events for observers (health monitor, transport)
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::{
    arguments::is_debug_gateway_enabled,
    config::{AuthConfig, Config, QueueConfig},
    errors::{DisconnectReason, GatewayError},
    logger::{self, LogTag},
};

use super::auth::{Identity, TokenVerifier};
use super::connection::{Connection, ConnectionSnapshot};
use super::message::{ClientRequest, Envelope};
use super::metrics::{GatewayMetrics, GatewayMetricsSnapshot};
use super::queue::PushOutcome;
use super::rate_limit::{Admission, RateLimiter};
use super::registry::{ChannelRegistry, SubscribeOutcome};
use super::ConnectionId;

const LIFECYCLE_CAPACITY: usize = 256;

// ============================================================================
// LIFECYCLE EVENTS
// ============================================================================

/// Connection lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connected(ConnectionId),
    Authenticated { id: ConnectionId, user_id: String },
    Disconnected { id: ConnectionId, reason: DisconnectReason },
}

// ============================================================================
// GATEWAY
// ============================================================================

pub struct Gateway {
    /// Live connections (connection_id → state)
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,

    registry: Arc<ChannelRegistry>,
    limiter: RateLimiter,
    verifier: TokenVerifier,
    auth_config: AuthConfig,
    queue_config: QueueConfig,
    metrics: GatewayMetrics,

    next_conn_id: AtomicU64,
    lifecycle: broadcast::Sender<LifecycleEvent>,
}

impl Gateway {
    pub fn new(config: &Config, registry: Arc<ChannelRegistry>, verifier: TokenVerifier) -> Arc<Self> {
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            registry,
            limiter: RateLimiter::new(&config.rate_limit),
            verifier,
            auth_config: config.auth.clone(),
            queue_config: config.queue.clone(),
            metrics: GatewayMetrics::new(),
            next_conn_id: AtomicU64::new(1),
            lifecycle,
        })
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Register a new, unauthenticated connection and queue its ack
    pub fn accept(&self) -> Arc<Connection> {
        let id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        let deadline = now + Duration::from_secs(self.auth_config.grace_period_secs);

        let connection = Arc::new(Connection::new(
            id,
            now,
            deadline,
            &self.limiter,
            self.queue_config.capacity,
        ));

        self.registry.register(id);
        self.connections.write().insert(id, Arc::clone(&connection));
        self.metrics.connection_opened();

        self.enqueue_for(
            &connection,
            Envelope::connection_ack(id, self.auth_config.grace_period_secs),
        );
        let _ = self.lifecycle.send(LifecycleEvent::Connected(id));

        if is_debug_gateway_enabled() {
            logger::debug(
                LogTag::Gateway,
                &format!(
                    "Connection {} accepted (active={})",
                    id,
                    self.connection_count()
                ),
            );
        }

        connection
    }

    /// Verify a credential and bind the identity to the connection
    ///
    /// A bad credential is fatal: the client gets a fatal error and the
    /// connection is closed. A second attempt on an authenticated
    /// connection is rejected without closing it.
    pub fn authenticate(&self, id: ConnectionId, token: &str) -> Result<Identity, GatewayError> {
        let connection = self.get(id)?;

        if connection.is_authenticated() {
            let err = GatewayError::AlreadyAuthenticated;
            self.enqueue_for(&connection, Envelope::error(&err, false));
            return Err(err);
        }

        match self.verifier.verify(token) {
            Ok(identity) => {
                if !connection.set_authenticated(identity.clone()) {
                    let err = GatewayError::AlreadyAuthenticated;
                    self.enqueue_for(&connection, Envelope::error(&err, false));
                    return Err(err);
                }

                self.metrics.authenticated();
                self.enqueue_for(&connection, Envelope::authenticated(&identity));
                let _ = self.lifecycle.send(LifecycleEvent::Authenticated {
                    id,
                    user_id: identity.user_id.clone(),
                });

                logger::info(
                    LogTag::Auth,
                    &format!(
                        "Connection {} authenticated as {} ({})",
                        id, identity.user_id, identity.role
                    ),
                );
                Ok(identity)
            }
            Err(err) => {
                self.reject_credential(&connection, &err);
                Err(err)
            }
        }
    }

    /// Close an unauthenticated connection whose grace period ran out
    pub fn enforce_auth_deadline(&self, id: ConnectionId) -> bool {
        let Some(connection) = self.connection(id) else {
            return false;
        };
        if connection.is_authenticated() {
            return false;
        }

        logger::warning(
            LogTag::Auth,
            &format!(
                "Connection {} did not authenticate within {}s",
                id, self.auth_config.grace_period_secs
            ),
        );
        let err = GatewayError::auth("authentication timeout");
        self.enqueue_for(&connection, Envelope::error(&err, err.is_connection_fatal()));
        self.disconnect(id, DisconnectReason::AuthTimeout)
    }

    /// Tear a connection down and release everything it holds
    ///
    /// Idempotent; returns false if the connection was already gone. Messages
    /// queued before the close stay available to the transport writer for
    /// a best-effort flush.
    pub fn disconnect(&self, id: ConnectionId, reason: DisconnectReason) -> bool {
        let Some(connection) = self.connections.write().remove(&id) else {
            return false;
        };

        connection.close(reason);
        let channels = self.registry.remove_connection(id);
        self.metrics.connection_closed(reason);
        let _ = self.lifecycle.send(LifecycleEvent::Disconnected { id, reason });

        let message = format!(
            "Connection {} closed ({}), released {} subscription(s)",
            id,
            reason,
            channels.len()
        );
        match reason {
            DisconnectReason::ClientClosed | DisconnectReason::Shutdown => {
                logger::debug(LogTag::Gateway, &message)
            }
            _ => logger::info(LogTag::Gateway, &message),
        }

        true
    }

    /// Disconnect everything (server shutdown)
    pub fn shutdown_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.read().keys().copied().collect();
        ids.into_iter()
            .filter(|id| self.disconnect(*id, DisconnectReason::Shutdown))
            .count()
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Handle one inbound text frame
    ///
    /// Returns the per-request error, if any, after it has been reported to
    /// the client.
    pub fn handle_inbound(&self, id: ConnectionId, text: &str) -> Result<(), GatewayError> {
        let connection = self.get(id)?;
        let now = Instant::now();

        connection.record_activity(now);
        connection.metrics().inc_received();

        match connection.admit(&self.limiter, now) {
            Admission::Allowed => {}
            Admission::Rejected { retry_after } => {
                self.metrics.rate_limit_violation();
                let err = GatewayError::RateLimited {
                    retry_after_ms: retry_after.as_millis() as u64,
                };
                self.enqueue_for(&connection, Envelope::error(&err, false));
                return Err(err);
            }
            Admission::Escalate { violations } => {
                self.metrics.rate_limit_violation();
                logger::warning(
                    LogTag::RateLimit,
                    &format!(
                        "Connection {} exceeded its request budget {} times in a row, closing",
                        id, violations
                    ),
                );
                let err = GatewayError::RateLimited { retry_after_ms: 0 };
                self.enqueue_for(&connection, Envelope::error(&err, true));
                self.disconnect(id, DisconnectReason::RateLimited);
                return Err(err);
            }
        }

        let request = match ClientRequest::parse(text) {
            Ok(request) => request,
            Err(err @ GatewayError::AuthError { .. }) => {
                self.reject_credential(&connection, &err);
                return Err(err);
            }
            Err(err) => {
                if is_debug_gateway_enabled() {
                    logger::debug(
                        LogTag::Gateway,
                        &format!("Connection {}: {}", id, err),
                    );
                }
                self.enqueue_for(&connection, Envelope::error(&err, false));
                return Err(err);
            }
        };

        if is_debug_gateway_enabled() {
            logger::debug(
                LogTag::Gateway,
                &format!("Connection {}: {} request", id, request.name()),
            );
        }

        match request {
            ClientRequest::Authenticate { token } => self.authenticate(id, &token).map(|_| ()),
            ClientRequest::Subscribe { channels } => {
                self.handle_subscribe(id, &channels);
                Ok(())
            }
            ClientRequest::Unsubscribe { channels } => {
                self.handle_unsubscribe(id, &channels);
                Ok(())
            }
            // Liveness already recorded above
            ClientRequest::HeartbeatAck => Ok(()),
        }
    }

    /// Subscribe to each channel independently, acknowledging each one
    pub fn handle_subscribe(
        &self,
        id: ConnectionId,
        channels: &[String],
    ) -> Vec<(String, Result<SubscribeOutcome, GatewayError>)> {
        let Some(connection) = self.connection(id) else {
            return Vec::new();
        };
        let auth = connection.auth_state();

        channels
            .iter()
            .map(|channel| {
                let result = self.registry.subscribe(id, &auth, channel);
                match &result {
                    Ok(_) => {
                        self.enqueue_for(&connection, Envelope::subscription_confirmed(channel));
                    }
                    Err(err) => {
                        logger::debug(
                            LogTag::Registry,
                            &format!("Connection {}: subscribe '{}' rejected: {}", id, channel, err),
                        );
                        self.enqueue_for(
                            &connection,
                            Envelope::subscription_rejected(channel, err),
                        );
                    }
                }
                (channel.clone(), result)
            })
            .collect()
    }

    /// Unsubscribe from each channel; unknown or absent channels still ack
    pub fn handle_unsubscribe(&self, id: ConnectionId, channels: &[String]) -> Vec<(String, bool)> {
        let Some(connection) = self.connection(id) else {
            return Vec::new();
        };

        channels
            .iter()
            .map(|channel| {
                let was_subscribed = self.registry.unsubscribe(id, channel);
                self.enqueue_for(
                    &connection,
                    Envelope::unsubscription_confirmed(channel, was_subscribed),
                );
                (channel.clone(), was_subscribed)
            })
            .collect()
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Queue a message for one connection without blocking
    pub fn send(&self, id: ConnectionId, envelope: Envelope) -> Result<PushOutcome, GatewayError> {
        let connection = self.get(id)?;
        match self.enqueue_for(&connection, envelope) {
            PushOutcome::Closed => Err(GatewayError::ConnectionClosed(id)),
            outcome => Ok(outcome),
        }
    }

    /// Every outbound message goes through here so overflows reach the
    /// gateway counters as well as the connection's
    fn enqueue_for(&self, connection: &Connection, envelope: Envelope) -> PushOutcome {
        let kind = envelope.kind;
        let outcome = connection.enqueue(envelope);

        let lost = match &outcome {
            PushOutcome::Queued => {
                self.metrics.message_sent();
                None
            }
            PushOutcome::QueuedWithEviction { evicted } => {
                self.metrics.message_sent();
                self.metrics.overflow();
                Some(evicted.kind)
            }
            PushOutcome::Dropped => {
                self.metrics.overflow();
                Some(kind)
            }
            PushOutcome::Closed => None,
        };

        if let Some(lost) = lost {
            if is_debug_gateway_enabled() {
                let err = GatewayError::QueueOverflow {
                    message_type: lost.to_string(),
                };
                logger::debug(
                    LogTag::Gateway,
                    &format!("Connection {}: {} (incoming '{}')", connection.id(), err, kind),
                );
            }
        }

        outcome
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(&id).cloned()
    }

    /// Point-in-time copy of the live connection set
    pub fn connections_snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn authenticated_count(&self) -> usize {
        self.connections
            .read()
            .values()
            .filter(|c| c.is_authenticated())
            .count()
    }

    /// Per-connection view for the metrics endpoint, ordered by id
    pub fn connection_snapshots(&self) -> Vec<ConnectionSnapshot> {
        let mut snapshots: Vec<ConnectionSnapshot> = self
            .connections_snapshot()
            .iter()
            .map(|c| c.snapshot(self.registry.subscriptions_of(c.id())))
            .collect();
        snapshots.sort_by_key(|s| s.id);
        snapshots
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> GatewayMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_config.drain_timeout_ms)
    }

    fn get(&self, id: ConnectionId) -> Result<Arc<Connection>, GatewayError> {
        self.connection(id)
            .ok_or(GatewayError::ConnectionClosed(id))
    }

    fn reject_credential(&self, connection: &Connection, err: &GatewayError) {
        self.metrics.auth_failed();
        logger::warning(
            LogTag::Auth,
            &format!("Connection {} failed authentication: {}", connection.id(), err),
        );
        self.enqueue_for(connection, Envelope::error(err, err.is_connection_fatal()));
        self.disconnect(connection.id(), DisconnectReason::AuthError);
    }
}
