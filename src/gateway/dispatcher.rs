/// Broadcast dispatcher - the producer entry point
///
/// Every channel gets a throttle window. The first event after a quiet
/// period goes out immediately and opens the window; while it is open:
/// - continuous metrics (ticks, positions, status) coalesce per key, latest wins
/// - discrete events are delivered up to `max_burst` per window, the rest
///   wait in a bounded backlog
/// A timer flushes whatever accumulated when the window closes.
///
/// Fan-out happens outside the window lock: snapshot the subscriber set,
/// then a non-blocking `Gateway::send` per subscriber.
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::{
    arguments::is_debug_dispatcher_enabled,
    config::ThrottleConfig,
    errors::GatewayError,
    logger::{self, LogTag},
};

use super::channels;
use super::hub::Gateway;
use super::message::{Delivery, Event};
use super::queue::PushOutcome;

/// What happened to a published event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Fanned out now; `recipients` counts queued deliveries in this emission
    Emitted { recipients: usize },
    /// Merged into the window's pending payload
    Coalesced,
    /// Waiting in the window's backlog
    Queued,
}

// ============================================================================
// THROTTLE WINDOW
// ============================================================================

#[derive(Debug, Default)]
struct ThrottleWindow {
    /// Start of the current window; `None` before the first emission
    opened_at: Option<Instant>,
    /// Coalesced slots in first-seen order: (key, latest event)
    pending: Vec<(Option<String>, Event)>,
    /// Discrete events beyond the burst budget
    backlog: VecDeque<Event>,
    /// Discrete events emitted in the current window
    emitted_discrete: usize,
    /// A flush task is pending for this window
    flush_armed: bool,
}

impl ThrottleWindow {
    fn is_open(&self, now: Instant, interval: Duration) -> bool {
        self.opened_at
            .map(|opened| now.duration_since(opened) < interval)
            .unwrap_or(false)
    }

    fn has_work(&self) -> bool {
        !self.pending.is_empty() || !self.backlog.is_empty()
    }

    /// Latest-wins merge; returns true when an older value was replaced
    fn merge(&mut self, event: Event) -> bool {
        let key = event.coalesce_key();
        match self
            .pending
            .iter_mut()
            .find(|(k, e)| *k == key && e.kind == event.kind)
        {
            Some(slot) => {
                slot.1 = event;
                true
            }
            None => {
                self.pending.push((key, event));
                false
            }
        }
    }

    /// Start a new window and take everything it may emit right away
    fn reopen(&mut self, now: Instant, max_burst: usize, batch: &mut Vec<Event>) {
        self.opened_at = Some(now);
        self.emitted_discrete = 0;
        batch.extend(self.pending.drain(..).map(|(_, event)| event));
        while self.emitted_discrete < max_burst {
            let Some(event) = self.backlog.pop_front() else {
                break;
            };
            batch.push(event);
            self.emitted_discrete += 1;
        }
    }

    /// Deliver now if the burst budget allows, else backlog
    ///
    /// Returns the number of backlog entries dropped to stay within capacity.
    fn admit_discrete(
        &mut self,
        event: Event,
        max_burst: usize,
        backlog_capacity: usize,
        batch: &mut Vec<Event>,
    ) -> (bool, u64) {
        if self.backlog.is_empty() && self.emitted_discrete < max_burst {
            self.emitted_discrete += 1;
            batch.push(event);
            return (true, 0);
        }

        self.backlog.push_back(event);
        let mut dropped = 0;
        while self.backlog.len() > backlog_capacity.max(1) {
            self.backlog.pop_front();
            dropped += 1;
        }
        (false, dropped)
    }
}

// ============================================================================
// STATS
// ============================================================================

#[derive(Debug, Default)]
struct DispatchCounters {
    published: AtomicU64,
    delivered: AtomicU64,
    coalesced: AtomicU64,
    backlog_dropped: AtomicU64,
    flushes: AtomicU64,
}

/// Dispatcher counters (serializable)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub published: u64,
    pub delivered: u64,
    pub coalesced: u64,
    pub backlog_dropped: u64,
    pub flushes: u64,
    pub active_windows: usize,
}

// ============================================================================
// DISPATCHER
// ============================================================================

pub struct BroadcastDispatcher {
    gateway: Arc<Gateway>,
    config: ThrottleConfig,
    windows: Mutex<HashMap<String, ThrottleWindow>>,
    counters: DispatchCounters,
}

impl BroadcastDispatcher {
    pub fn new(gateway: Arc<Gateway>, config: ThrottleConfig) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            config,
            windows: Mutex::new(HashMap::new()),
            counters: DispatchCounters::default(),
        })
    }

    /// Publish an event to a channel
    ///
    /// Never blocks on subscribers. Fails only for malformed channel names.
    pub fn publish(self: &Arc<Self>, channel: &str, event: Event) -> Result<PublishOutcome, GatewayError> {
        channels::resolve_policy(channel)?;
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        let interval = Duration::from_millis(self.config.interval_for(channel));
        if interval.is_zero() {
            let recipients = self.deliver(channel, vec![event]);
            return Ok(PublishOutcome::Emitted { recipients });
        }

        let now = Instant::now();
        let max_burst = self.config.max_burst.max(1);
        let mut batch = Vec::new();
        let mut arm_at = None;

        let outcome = {
            let mut windows = self.windows.lock();
            let window = windows.entry(channel.to_string()).or_default();
            let delivery = event.kind.delivery();

            let outcome = if !window.is_open(now, interval) {
                if delivery == Delivery::Coalesce {
                    window.merge(event);
                    window.reopen(now, max_burst, &mut batch);
                    None
                } else {
                    window.reopen(now, max_burst, &mut batch);
                    let (emitted, dropped) = window.admit_discrete(
                        event,
                        max_burst,
                        self.config.backlog_capacity,
                        &mut batch,
                    );
                    self.count_backlog_drops(channel, dropped);
                    (!emitted).then_some(PublishOutcome::Queued)
                }
            } else if delivery == Delivery::Coalesce {
                if window.merge(event) {
                    self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                }
                Some(PublishOutcome::Coalesced)
            } else {
                let (emitted, dropped) = window.admit_discrete(
                    event,
                    max_burst,
                    self.config.backlog_capacity,
                    &mut batch,
                );
                self.count_backlog_drops(channel, dropped);
                (!emitted).then_some(PublishOutcome::Queued)
            };

            if window.has_work() && !window.flush_armed {
                window.flush_armed = true;
                arm_at = window.opened_at.map(|opened| opened + interval);
            }
            outcome
        };

        if let Some(deadline) = arm_at {
            self.arm_flush(channel, deadline);
        }

        let recipients = self.deliver(channel, batch);
        Ok(outcome.unwrap_or(PublishOutcome::Emitted { recipients }))
    }

    /// Publish to one user's private channel
    pub fn publish_to_user(self: &Arc<Self>, user_id: &str, event: Event) -> Result<PublishOutcome, GatewayError> {
        self.publish(&channels::user_channel(user_id), event)
    }

    /// Close the window and emit what accumulated
    ///
    /// Returns the next deadline when backlog remains.
    fn flush(&self, channel: &str) -> Option<Instant> {
        let now = Instant::now();
        let interval = Duration::from_millis(self.config.interval_for(channel));
        let mut batch = Vec::new();

        let next = {
            let mut windows = self.windows.lock();
            let window = windows.get_mut(channel)?;

            if !window.has_work() {
                window.flush_armed = false;
                return None;
            }

            // A publish reopened the window since this flush was armed
            if let Some(opened) = window.opened_at {
                if window.is_open(now, interval) {
                    return Some(opened + interval);
                }
            }

            window.reopen(now, self.config.max_burst.max(1), &mut batch);
            if window.backlog.is_empty() {
                window.flush_armed = false;
                None
            } else {
                Some(now + interval)
            }
        };

        self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        let recipients = self.deliver(channel, batch);

        if is_debug_dispatcher_enabled() {
            logger::debug(
                LogTag::Dispatcher,
                &format!(
                    "Flushed '{}' ({} deliveries, backlog pending: {})",
                    channel,
                    recipients,
                    next.is_some()
                ),
            );
        }

        next
    }

    fn arm_flush(self: &Arc<Self>, channel: &str, deadline: Instant) {
        let dispatcher = Arc::clone(self);
        let channel = channel.to_string();
        tokio::spawn(async move {
            let mut deadline = deadline;
            loop {
                tokio::time::sleep_until(deadline).await;
                match dispatcher.flush(&channel) {
                    Some(next) => deadline = next,
                    None => break,
                }
            }
        });
    }

    /// Fan a batch out to the channel's current subscribers
    fn deliver(&self, channel: &str, events: Vec<Event>) -> usize {
        if events.is_empty() {
            return 0;
        }

        let subscribers = self.gateway.registry().subscribers_of(channel);
        if subscribers.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        for event in events {
            let envelope = event.to_envelope(channel);
            for conn_id in &subscribers {
                // Closed connections are skipped; the registry already forgot them
                if let Ok(outcome) = self.gateway.send(*conn_id, envelope.clone()) {
                    if outcome != PushOutcome::Dropped {
                        delivered += 1;
                    }
                }
            }
        }

        self.counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);

        if is_debug_dispatcher_enabled() {
            logger::verbose(
                LogTag::Dispatcher,
                &format!(
                    "'{}' fan-out to {} subscriber(s): {} deliveries",
                    channel,
                    subscribers.len(),
                    delivered
                ),
            );
        }

        delivered
    }

    fn count_backlog_drops(&self, channel: &str, dropped: u64) {
        if dropped == 0 {
            return;
        }
        self.counters
            .backlog_dropped
            .fetch_add(dropped, Ordering::Relaxed);
        logger::warning(
            LogTag::Dispatcher,
            &format!("Backlog full on '{}', dropped {} oldest event(s)", channel, dropped),
        );
    }

    /// Forget idle windows (closed, nothing pending, no timer)
    pub fn prune_idle_windows(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|channel, window| {
            let interval = Duration::from_millis(self.config.interval_for(channel));
            window.flush_armed || window.has_work() || window.is_open(now, interval)
        });
        before - windows.len()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            backlog_dropped: self.counters.backlog_dropped.load(Ordering::Relaxed),
            flushes: self.counters.flushes.load(Ordering::Relaxed),
            active_windows: self.windows.lock().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gateway::auth::{Role, TokenIssuer, TokenVerifier};
    use crate::gateway::connection::Connection;
    use crate::gateway::message::{Envelope, EventKind, MessageType};
    use crate::gateway::registry::ChannelRegistry;
    use ed25519_dalek::SigningKey;
    use serde_json::json;

    fn setup(mutate: impl FnOnce(&mut Config)) -> (Arc<Gateway>, Arc<BroadcastDispatcher>) {
        let mut config = Config::default();
        config.throttle.default_interval_ms = 100;
        mutate(&mut config);
        let verifier = TokenVerifier::new(
            TokenIssuer::new(SigningKey::from_bytes(&[1u8; 32])).verifying_key(),
            0,
        );
        let gateway = Gateway::new(&config, Arc::new(ChannelRegistry::new()), verifier);
        let dispatcher = BroadcastDispatcher::new(Arc::clone(&gateway), config.throttle.clone());
        (gateway, dispatcher)
    }

    fn subscriber(gateway: &Gateway, channel: &str) -> Arc<Connection> {
        let conn = gateway.accept();
        let token = TokenIssuer::new(SigningKey::from_bytes(&[1u8; 32]))
            .issue_for("viewer", Role::User, 3600)
            .unwrap();
        gateway.authenticate(conn.id(), &token).unwrap();
        gateway.handle_subscribe(conn.id(), &[channel.to_string()]);
        drain(&conn);
        conn
    }

    fn drain(conn: &Connection) -> Vec<Envelope> {
        std::iter::from_fn(|| conn.next_outbound_now()).collect()
    }

    fn tick(symbol: &str, price: u64) -> Event {
        Event::new(EventKind::MarketData, json!({ "symbol": symbol, "price": price }))
    }

    fn trade(id: u64) -> Event {
        Event::new(EventKind::TradeExecution, json!({ "id": id }))
    }

    fn ids(envelopes: &[Envelope]) -> Vec<u64> {
        envelopes.iter().filter_map(|e| e.data["id"].as_u64()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_coalesce_to_latest_value() {
        let (gateway, dispatcher) = setup(|_| {});
        let conn = subscriber(&gateway, "market_data");

        // Opens the window
        assert!(matches!(
            dispatcher.publish("market_data", tick("BTC", 100)).unwrap(),
            PublishOutcome::Emitted { recipients: 1 }
        ));
        assert_eq!(drain(&conn).len(), 1);

        for price in [101, 102, 103] {
            assert_eq!(
                dispatcher.publish("market_data", tick("BTC", price)).unwrap(),
                PublishOutcome::Coalesced
            );
        }
        assert!(drain(&conn).is_empty());

        tokio::time::sleep(Duration::from_millis(150)).await;

        let sent = drain(&conn);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageType::MarketData);
        assert_eq!(sent[0].data["price"], 103);
        assert_eq!(dispatcher.stats().coalesced, 2);
        assert_eq!(dispatcher.stats().flushes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalescing_is_per_symbol() {
        let (gateway, dispatcher) = setup(|_| {});
        let conn = subscriber(&gateway, "market_data");

        dispatcher.publish("market_data", tick("BTC", 1)).unwrap();
        dispatcher.publish("market_data", tick("BTC", 2)).unwrap();
        dispatcher.publish("market_data", tick("ETH", 10)).unwrap();
        dispatcher.publish("market_data", tick("BTC", 3)).unwrap();
        dispatcher.publish("market_data", tick("ETH", 11)).unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        let prices: Vec<_> = drain(&conn)
            .iter()
            .map(|e| (e.data["symbol"].as_str().unwrap().to_string(), e.data["price"].as_u64().unwrap()))
            .collect();
        assert_eq!(
            prices,
            vec![
                ("BTC".to_string(), 1),
                ("BTC".to_string(), 3),
                ("ETH".to_string(), 11)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_discrete_events_are_never_coalesced() {
        let (gateway, dispatcher) = setup(|_| {});
        let conn = subscriber(&gateway, "trade_executions");

        dispatcher.publish("trade_executions", trade(1)).unwrap();
        dispatcher.publish("trade_executions", trade(2)).unwrap();

        let sent = drain(&conn);
        assert_eq!(ids(&sent), vec![1, 2]);
        assert!(sent.iter().all(|e| e.kind == MessageType::TradeExecution));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(drain(&conn).is_empty());
        assert_eq!(dispatcher.stats().coalesced, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_overflow_waits_for_next_window_in_order() {
        let (gateway, dispatcher) = setup(|config| config.throttle.max_burst = 2);
        let conn = subscriber(&gateway, "trade_executions");

        let outcomes: Vec<_> = (1..=5)
            .map(|id| dispatcher.publish("trade_executions", trade(id)).unwrap())
            .collect();
        assert!(matches!(outcomes[0], PublishOutcome::Emitted { .. }));
        assert!(matches!(outcomes[1], PublishOutcome::Emitted { .. }));
        assert_eq!(outcomes[2], PublishOutcome::Queued);
        assert_eq!(ids(&drain(&conn)), vec![1, 2]);

        tokio::time::sleep(Duration::from_millis(110)).await;
        assert_eq!(ids(&drain(&conn)), vec![3, 4]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ids(&drain(&conn)), vec![5]);
        assert_eq!(dispatcher.stats().backlog_dropped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_is_bounded() {
        let (gateway, dispatcher) = setup(|config| {
            config.throttle.max_burst = 1;
            config.throttle.backlog_capacity = 2;
        });
        let conn = subscriber(&gateway, "trade_executions");

        for id in 1..=5 {
            dispatcher.publish("trade_executions", trade(id)).unwrap();
        }
        assert_eq!(dispatcher.stats().backlog_dropped, 2);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(ids(&drain(&conn)), vec![1, 4, 5]);
    }

    #[tokio::test]
    async fn test_full_subscriber_does_not_block_others() {
        let (gateway, dispatcher) = setup(|config| {
            config.queue.capacity = 4;
            config.throttle.default_interval_ms = 0;
        });
        let stuck = subscriber(&gateway, "trade_executions");
        let healthy = subscriber(&gateway, "trade_executions");

        // Fill the stuck connection with undroppable messages
        for seq in 0..4 {
            gateway.send(stuck.id(), Envelope::heartbeat(seq)).unwrap();
        }

        for id in 1..=3 {
            dispatcher.publish("trade_executions", trade(id)).unwrap();
        }

        assert_eq!(ids(&drain(&healthy)), vec![1, 2, 3]);
        assert!(drain(&stuck).iter().all(|e| e.kind == MessageType::Heartbeat));
        assert_eq!(stuck.metrics().overflows(), 3);
        assert_eq!(dispatcher.stats().delivered, 3);
    }

    #[tokio::test]
    async fn test_only_subscribers_receive() {
        let (gateway, dispatcher) = setup(|config| config.throttle.default_interval_ms = 0);
        let btc = subscriber(&gateway, "market_data:BTC");
        let eth = subscriber(&gateway, "market_data:ETH");

        dispatcher
            .publish("market_data:BTC", tick("BTC", 1))
            .unwrap();

        assert_eq!(drain(&btc).len(), 1);
        assert!(drain(&eth).is_empty());
    }

    #[tokio::test]
    async fn test_channel_override_disables_throttle() {
        let (gateway, dispatcher) = setup(|config| {
            config
                .throttle
                .channel_intervals_ms
                .insert("market_data:SOL".to_string(), 0);
        });
        let conn = subscriber(&gateway, "market_data:SOL");

        for price in 1..=3 {
            dispatcher.publish("market_data:SOL", tick("SOL", price)).unwrap();
        }
        assert_eq!(drain(&conn).len(), 3);
        assert_eq!(dispatcher.stats().active_windows, 0);
    }

    #[tokio::test]
    async fn test_unknown_channel_is_rejected() {
        let (_gateway, dispatcher) = setup(|_| {});
        let err = dispatcher.publish("no such channel", trade(1)).unwrap_err();
        assert_eq!(err.code(), "unknown_channel");
        assert_eq!(dispatcher.stats().published, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_windows_are_pruned() {
        let (_gateway, dispatcher) = setup(|_| {});
        dispatcher.publish("system_status", Event::new(EventKind::SystemStatus, json!({}))).unwrap();
        assert_eq!(dispatcher.prune_idle_windows(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(dispatcher.prune_idle_windows(), 1);
        assert_eq!(dispatcher.stats().active_windows, 0);
    }
}
