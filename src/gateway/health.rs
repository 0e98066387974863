/// Health monitoring
///
/// Heartbeat pings, stale-connection eviction and aggregate liveness stats.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::{pending, Future};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::{
    arguments::is_debug_health_enabled,
    config::HealthConfig,
    errors::{DisconnectReason, GatewayError},
    logger::{self, LogTag},
};

use super::dispatcher::{BroadcastDispatcher, DispatchStats};
use super::hub::{Gateway, LifecycleEvent};
use super::message::{Envelope, Event, EventKind};
use super::ConnectionId;

// ============================================================================
// CONNECTION HEALTH TRACKER
// ============================================================================

/// What a sweep decided for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    Ping,
    Evict { missed: u32 },
}

/// Connection liveness state
#[derive(Debug)]
pub struct ConnectionHealth {
    /// Last client activity (any inbound frame)
    last_activity: Instant,

    /// A ping was sent and nothing has arrived since
    awaiting_ack: bool,

    /// Pings that went unanswered in a row
    missed: u32,
}

impl ConnectionHealth {
    pub fn new(now: Instant) -> Self {
        Self {
            last_activity: now,
            awaiting_ack: false,
            missed: 0,
        }
    }

    /// Record client activity; clears any outstanding ping
    pub fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
        self.awaiting_ack = false;
        self.missed = 0;
    }

    /// Advance one heartbeat period
    pub fn on_sweep(&mut self, max_missed: u32) -> SweepAction {
        if self.awaiting_ack {
            self.missed += 1;
        }
        if self.missed >= max_missed.max(1) {
            return SweepAction::Evict {
                missed: self.missed,
            };
        }
        self.awaiting_ack = true;
        SweepAction::Ping
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }

    pub fn seconds_since_activity(&self, now: Instant) -> u64 {
        now.duration_since(self.last_activity).as_secs()
    }
}

// ============================================================================
// STATS
// ============================================================================

/// Result of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pinged: usize,
    pub evicted: Vec<ConnectionId>,
}

/// Aggregate liveness snapshot (serializable)
#[derive(Debug, Clone, Serialize)]
pub struct HealthStats {
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    pub connected: usize,
    pub authenticated: usize,
    pub channels: BTreeMap<String, usize>,
    pub total_connections: u64,
    pub queue_overflows: u64,
    pub rate_limit_violations: u64,
    pub auth_failures: u64,
    pub disconnects: BTreeMap<String, u64>,
    pub heartbeat_sweeps: u64,
    pub dispatcher: DispatchStats,
}

// ============================================================================
// HEALTH MONITOR
// ============================================================================

pub struct HealthMonitor {
    gateway: Arc<Gateway>,
    dispatcher: Arc<BroadcastDispatcher>,
    config: HealthConfig,
    started_at: Instant,
    heartbeat_seq: AtomicU64,
    sweeps: AtomicU64,
}

impl HealthMonitor {
    pub fn new(
        gateway: Arc<Gateway>,
        dispatcher: Arc<BroadcastDispatcher>,
        config: HealthConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            dispatcher,
            config,
            started_at: Instant::now(),
            heartbeat_seq: AtomicU64::new(1),
            sweeps: AtomicU64::new(0),
        })
    }

    /// One heartbeat period across all live connections
    pub fn sweep(&self) -> SweepReport {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        let mut report = SweepReport::default();

        for connection in self.gateway.connections_snapshot() {
            let action = connection
                .health()
                .lock()
                .on_sweep(self.config.max_missed_heartbeats);

            match action {
                SweepAction::Ping => {
                    let seq = self.heartbeat_seq.fetch_add(1, Ordering::Relaxed);
                    if self.gateway.send(connection.id(), Envelope::heartbeat(seq)).is_ok() {
                        report.pinged += 1;
                    }
                }
                SweepAction::Evict { missed } => {
                    logger::warning(
                        LogTag::Health,
                        &format!(
                            "Connection {} missed {} heartbeats, evicting",
                            connection.id(),
                            missed
                        ),
                    );
                    let err = GatewayError::HeartbeatTimeout { missed };
                    let _ = self
                        .gateway
                        .send(connection.id(), Envelope::error(&err, err.is_connection_fatal()));
                    if self
                        .gateway
                        .disconnect(connection.id(), DisconnectReason::HeartbeatTimeout)
                    {
                        report.evicted.push(connection.id());
                    }
                }
            }
        }

        if is_debug_health_enabled() {
            logger::debug(
                LogTag::Health,
                &format!(
                    "Heartbeat sweep: pinged={}, evicted={}",
                    report.pinged,
                    report.evicted.len()
                ),
            );
        }

        report
    }

    pub fn stats(&self) -> HealthStats {
        let metrics = self.gateway.metrics();
        HealthStats {
            timestamp: Utc::now(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            connected: self.gateway.connection_count(),
            authenticated: self.gateway.authenticated_count(),
            channels: self.gateway.registry().channel_counts(),
            total_connections: metrics.total_connections,
            queue_overflows: metrics.total_overflows,
            rate_limit_violations: metrics.rate_limit_violations,
            auth_failures: metrics.auth_failures,
            disconnects: metrics.disconnects,
            heartbeat_sweeps: self.sweeps.load(Ordering::Relaxed),
            dispatcher: self.dispatcher.stats(),
        }
    }

    /// Publish the current stats on the public status channel
    pub fn publish_status(&self) {
        let data = match serde_json::to_value(self.stats()) {
            Ok(data) => data,
            Err(e) => {
                logger::error(LogTag::Health, &format!("Failed to encode status: {}", e));
                return;
            }
        };
        if let Err(e) = self
            .dispatcher
            .publish("system_status", Event::new(EventKind::SystemStatus, data))
        {
            logger::error(LogTag::Health, &format!("Failed to publish status: {}", e));
        }
    }

    /// Run until `shutdown` resolves
    pub async fn run(self: Arc<Self>, shutdown: impl Future<Output = ()>) {
        let period = Duration::from_secs(self.config.heartbeat_interval_secs.max(1));
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut status = (self.config.status_interval_secs > 0).then(|| {
            let every = Duration::from_secs(self.config.status_interval_secs);
            interval_at(Instant::now() + every, every)
        });

        let mut lifecycle = self.gateway.subscribe_lifecycle();
        tokio::pin!(shutdown);

        logger::info(
            LogTag::Health,
            &format!(
                "Health monitor started (heartbeat={}s, max_missed={})",
                period.as_secs(),
                self.config.max_missed_heartbeats
            ),
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = heartbeat.tick() => {
                    self.sweep();
                    self.dispatcher.prune_idle_windows();
                }
                _ = tick_optional(&mut status) => self.publish_status(),
                event = lifecycle.recv() => match event {
                    Ok(event) => self.observe(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        logger::warning(
                            LogTag::Health,
                            &format!("Lifecycle stream lagged, skipped {} events", skipped),
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        logger::info(LogTag::Health, "Health monitor stopped");
    }

    fn observe(&self, event: LifecycleEvent) {
        if !is_debug_health_enabled() {
            return;
        }
        let message = match event {
            LifecycleEvent::Connected(id) => format!("Connection {} opened", id),
            LifecycleEvent::Authenticated { id, user_id } => {
                format!("Connection {} authenticated as {}", id, user_id)
            }
            LifecycleEvent::Disconnected { id, reason } => {
                format!("Connection {} gone ({})", id, reason)
            }
        };
        logger::debug(LogTag::Health, &message);
    }
}

async fn tick_optional(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}
