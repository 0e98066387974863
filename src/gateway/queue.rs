/// Bounded per-connection outbound queue
///
/// Producers never block. When the queue is full the oldest non-critical
/// message is evicted to make room. Critical messages (acks, errors,
/// heartbeats) are never evicted by regular traffic. Once only critical
/// messages remain, a new heartbeat or non-fatal error replaces the oldest
/// queued one of those, and acks plus fatal errors may use a small fixed
/// headroom above capacity.
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

use super::message::Envelope;

/// Slots above capacity reserved for connection_ack, authenticated and one
/// fatal error
const CRITICAL_HEADROOM: usize = 3;

/// Result of a push
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting an older message
    QueuedWithEviction { evicted: Envelope },
    /// The incoming message itself was dropped
    Dropped,
    /// Queue closed; nothing was queued
    Closed,
}

impl PushOutcome {
    /// Whether a message was lost
    pub fn is_overflow(&self) -> bool {
        matches!(
            self,
            PushOutcome::QueuedWithEviction { .. } | PushOutcome::Dropped
        )
    }
}

pub struct OutboundQueue {
    items: Mutex<VecDeque<Envelope>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Non-blocking enqueue applying the drop policy
    pub fn push(&self, envelope: Envelope) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed;
        }

        let outcome = {
            let mut items = self.items.lock();
            if items.len() < self.capacity {
                items.push_back(envelope);
                PushOutcome::Queued
            } else if let Some(pos) = items.iter().position(|e| !e.is_critical()) {
                let evicted = items.remove(pos);
                items.push_back(envelope);
                match evicted {
                    Some(evicted) => PushOutcome::QueuedWithEviction { evicted },
                    None => PushOutcome::Queued,
                }
            } else if !envelope.is_critical() {
                PushOutcome::Dropped
            } else if envelope.is_supersedable() {
                let position = items.iter().position(|e| e.is_supersedable());
                match position.and_then(|pos| items.remove(pos)) {
                    Some(evicted) => {
                        items.push_back(envelope);
                        PushOutcome::QueuedWithEviction { evicted }
                    }
                    None => PushOutcome::Dropped,
                }
            } else if items.len() < self.capacity + CRITICAL_HEADROOM {
                items.push_back(envelope);
                PushOutcome::Queued
            } else {
                PushOutcome::Dropped
            }
        };

        if !matches!(outcome, PushOutcome::Dropped) {
            self.notify.notify_one();
        }
        outcome
    }

    /// Next message, waiting if empty; `None` once closed and drained
    pub async fn next(&self) -> Option<Envelope> {
        loop {
            let notified = self.notify.notified();
            if let Some(envelope) = self.try_next() {
                return Some(envelope);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    pub fn try_next(&self) -> Option<Envelope> {
        self.items.lock().pop_front()
    }

    /// Stop accepting messages; already-queued ones can still be drained
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Drop everything still queued, returning how many were discarded
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let count = items.len();
        items.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GatewayError;
    use crate::gateway::message::{EventKind, Event, MessageType};
    use serde_json::json;
    use std::sync::Arc;

    fn tick(n: u64) -> Envelope {
        Event::new(EventKind::MarketData, json!({ "n": n })).to_envelope("market_data")
    }

    #[test]
    fn test_fifo_under_capacity() {
        let queue = OutboundQueue::new(4);
        for n in 0..3 {
            assert_eq!(queue.push(tick(n)), PushOutcome::Queued);
        }
        let order: Vec<_> = std::iter::from_fn(|| queue.try_next())
            .map(|e| e.data["n"].as_u64().unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_full_queue_evicts_oldest_non_critical() {
        let queue = OutboundQueue::new(3);
        queue.push(Envelope::heartbeat(1));
        queue.push(tick(1));
        queue.push(tick(2));

        match queue.push(tick(3)) {
            PushOutcome::QueuedWithEviction { evicted } => assert_eq!(evicted.data["n"], 1),
            other => panic!("expected eviction, got {:?}", other),
        }
        assert_eq!(queue.len(), 3);

        let kinds: Vec<_> = std::iter::from_fn(|| queue.try_next()).map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![MessageType::Heartbeat, MessageType::MarketData, MessageType::MarketData]
        );
    }

    #[test]
    fn test_saturated_queue_supersedes_soft_critical_messages() {
        let queue = OutboundQueue::new(2);
        queue.push(Envelope::connection_ack(1, 10));
        queue.push(Envelope::heartbeat(1));

        // Non-critical incoming with nothing evictable is dropped
        assert_eq!(queue.push(tick(1)), PushOutcome::Dropped);
        assert!(PushOutcome::Dropped.is_overflow());

        // A newer heartbeat replaces the queued one instead of growing the queue
        match queue.push(Envelope::heartbeat(2)) {
            PushOutcome::QueuedWithEviction { evicted } => assert_eq!(evicted.data["seq"], 1),
            other => panic!("expected supersede, got {:?}", other),
        }
        assert_eq!(queue.len(), 2);

        // Fatal errors still get in past capacity
        let fatal = Envelope::error(&GatewayError::auth("expired"), true);
        assert_eq!(queue.push(fatal), PushOutcome::Queued);
        assert_eq!(queue.len(), 3);

        let kinds: Vec<_> = std::iter::from_fn(|| queue.try_next()).map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![MessageType::ConnectionAck, MessageType::Heartbeat, MessageType::Error]
        );
    }

    #[test]
    fn test_soft_critical_dropped_when_only_acks_remain() {
        let queue = OutboundQueue::new(1);
        queue.push(Envelope::connection_ack(1, 10));

        assert_eq!(queue.push(Envelope::heartbeat(1)), PushOutcome::Dropped);
        let soft = Envelope::error(&GatewayError::invalid_message("bad"), false);
        assert_eq!(queue.push(soft), PushOutcome::Dropped);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_critical_headroom_is_bounded() {
        let queue = OutboundQueue::new(1);
        for n in 0..10 {
            queue.push(Envelope::connection_ack(n, 10));
        }
        assert_eq!(queue.len(), 1 + CRITICAL_HEADROOM);
    }

    #[test]
    fn test_closed_queue_rejects_but_drains() {
        let queue = OutboundQueue::new(4);
        queue.push(tick(1));
        queue.close();

        assert_eq!(queue.push(tick(2)), PushOutcome::Closed);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.clear(), 1);
    }

    #[tokio::test]
    async fn test_next_waits_and_ends_on_close() {
        let queue = Arc::new(OutboundQueue::new(4));

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let mut received = Vec::new();
                while let Some(envelope) = queue.next().await {
                    received.push(envelope.data["n"].as_u64().unwrap_or(0));
                }
                received
            })
        };

        tokio::task::yield_now().await;
        queue.push(tick(7));
        queue.push(tick(8));
        tokio::task::yield_now().await;
        queue.close();

        let received = consumer.await.unwrap();
        assert_eq!(received, vec![7, 8]);
    }
}
