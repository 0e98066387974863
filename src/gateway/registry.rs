/// Channel registry - sole owner of channel ↔ connection membership
///
/// Both directions of the mapping live behind one lock, so a reader can
/// never observe a connection in a channel's subscriber set without the
/// channel in the connection's subscription set (or the reverse).
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::auth::AuthState;
use super::channels::{self, AccessPolicy};
use super::ConnectionId;
use crate::errors::GatewayError;
use crate::logger::{self, LogTag};

/// Result of a successful subscribe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Subscribed(AccessPolicy),
    AlreadySubscribed(AccessPolicy),
}

#[derive(Default)]
struct RegistryInner {
    /// channel name → subscribers
    channels: HashMap<String, HashSet<ConnectionId>>,
    /// connection → subscribed channels (present only while the connection is live)
    subscriptions: HashMap<ConnectionId, HashSet<String>>,
}

#[derive(Default)]
pub struct ChannelRegistry {
    inner: RwLock<RegistryInner>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a connection known; subscribe fails for unknown ids
    pub fn register(&self, conn_id: ConnectionId) {
        self.inner
            .write()
            .subscriptions
            .entry(conn_id)
            .or_default();
    }

    /// Drop a connection from every channel and forget it
    ///
    /// Returns the channels it was subscribed to.
    pub fn remove_connection(&self, conn_id: ConnectionId) -> Vec<String> {
        let mut inner = self.inner.write();
        let Some(subscribed) = inner.subscriptions.remove(&conn_id) else {
            return Vec::new();
        };

        for channel in &subscribed {
            remove_member(&mut inner.channels, channel, conn_id);
        }

        let mut removed: Vec<String> = subscribed.into_iter().collect();
        removed.sort();
        removed
    }

    /// Authorize and subscribe
    pub fn subscribe(
        &self,
        conn_id: ConnectionId,
        auth: &AuthState,
        channel: &str,
    ) -> Result<SubscribeOutcome, GatewayError> {
        let policy = channels::authorize(channel, auth)?;

        let mut inner = self.inner.write();
        let Some(subscribed) = inner.subscriptions.get_mut(&conn_id) else {
            return Err(GatewayError::ConnectionClosed(conn_id));
        };

        if !subscribed.insert(channel.to_string()) {
            return Ok(SubscribeOutcome::AlreadySubscribed(policy));
        }

        let created = !inner.channels.contains_key(channel);
        inner
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(conn_id);

        if created {
            logger::debug(
                LogTag::Registry,
                &format!("Channel '{}' created ({})", channel, policy.label()),
            );
        }

        Ok(SubscribeOutcome::Subscribed(policy))
    }

    /// Remove one subscription; returns whether it existed
    pub fn unsubscribe(&self, conn_id: ConnectionId, channel: &str) -> bool {
        let mut inner = self.inner.write();
        let was_subscribed = inner
            .subscriptions
            .get_mut(&conn_id)
            .map(|subscribed| subscribed.remove(channel))
            .unwrap_or(false);

        if was_subscribed {
            remove_member(&mut inner.channels, channel, conn_id);
        }

        was_subscribed
    }

    /// Point-in-time subscriber snapshot
    pub fn subscribers_of(&self, channel: &str) -> Vec<ConnectionId> {
        self.inner
            .read()
            .channels
            .get(channel)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Channels a connection is subscribed to (sorted)
    pub fn subscriptions_of(&self, conn_id: ConnectionId) -> Vec<String> {
        let inner = self.inner.read();
        let mut channels: Vec<String> = inner
            .subscriptions
            .get(&conn_id)
            .map(|subscribed| subscribed.iter().cloned().collect())
            .unwrap_or_default();
        channels.sort();
        channels
    }

    /// Subscriber count per active channel
    pub fn channel_counts(&self) -> BTreeMap<String, usize> {
        self.inner
            .read()
            .channels
            .iter()
            .map(|(name, members)| (name.clone(), members.len()))
            .collect()
    }

    /// Number of channels with at least one subscriber
    pub fn channel_count(&self) -> usize {
        self.inner.read().channels.len()
    }

    /// Both directions agree (used by tests)
    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        let inner = self.inner.read();
        let forward = inner.channels.iter().all(|(channel, members)| {
            !members.is_empty()
                && members.iter().all(|id| {
                    inner
                        .subscriptions
                        .get(id)
                        .map(|s| s.contains(channel))
                        .unwrap_or(false)
                })
        });
        let backward = inner.subscriptions.iter().all(|(id, subscribed)| {
            subscribed.iter().all(|channel| {
                inner
                    .channels
                    .get(channel)
                    .map(|m| m.contains(id))
                    .unwrap_or(false)
            })
        });
        forward && backward
    }
}

/// Remove a member, dropping the channel once empty
fn remove_member(
    channels: &mut HashMap<String, HashSet<ConnectionId>>,
    channel: &str,
    conn_id: ConnectionId,
) {
    if let Some(members) = channels.get_mut(channel) {
        members.remove(&conn_id);
        if members.is_empty() {
            channels.remove(channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::auth::{Identity, Role};
    use std::sync::Arc;

    fn user(id: &str) -> AuthState {
        AuthState::Authenticated(Identity {
            user_id: id.to_string(),
            role: Role::User,
        })
    }

    #[test]
    fn test_subscribe_updates_both_sides() {
        let registry = ChannelRegistry::new();
        registry.register(1);

        let outcome = registry.subscribe(1, &user("alice"), "signals").unwrap();
        assert_eq!(outcome, SubscribeOutcome::Subscribed(AccessPolicy::Authenticated));
        assert_eq!(registry.subscribers_of("signals"), vec![1]);
        assert_eq!(registry.subscriptions_of(1), vec!["signals".to_string()]);

        let again = registry.subscribe(1, &user("alice"), "signals").unwrap();
        assert!(matches!(again, SubscribeOutcome::AlreadySubscribed(_)));
        assert_eq!(registry.subscribers_of("signals").len(), 1);
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_unauthorized_subscription_leaves_no_trace() {
        let registry = ChannelRegistry::new();
        registry.register(1);

        let err = registry.subscribe(1, &user("bob"), "user:alice").unwrap_err();
        assert_eq!(err.code(), "unauthorized");
        assert!(registry.subscribers_of("user:alice").is_empty());
        assert!(registry.subscriptions_of(1).is_empty());
        assert_eq!(registry.channel_count(), 0);
    }

    #[test]
    fn test_unsubscribe_is_idempotent_and_gcs_channel() {
        let registry = ChannelRegistry::new();
        registry.register(1);
        registry.subscribe(1, &AuthState::Unauthenticated, "market_data").unwrap();

        assert!(registry.unsubscribe(1, "market_data"));
        assert!(!registry.unsubscribe(1, "market_data"));
        assert!(!registry.unsubscribe(1, "never_seen"));
        assert_eq!(registry.channel_count(), 0);

        // Re-subscribing recreates the channel
        registry.subscribe(1, &AuthState::Unauthenticated, "market_data").unwrap();
        assert_eq!(registry.subscribers_of("market_data"), vec![1]);
    }

    #[test]
    fn test_remove_connection_clears_every_channel() {
        let registry = ChannelRegistry::new();
        registry.register(1);
        registry.register(2);
        for channel in ["market_data", "signals", "user:alice"] {
            registry.subscribe(1, &user("alice"), channel).unwrap();
        }
        registry.subscribe(2, &user("bob"), "signals").unwrap();

        let removed = registry.remove_connection(1);
        assert_eq!(removed, vec!["market_data", "signals", "user:alice"]);
        assert_eq!(registry.subscribers_of("signals"), vec![2]);
        assert!(registry.subscribers_of("user:alice").is_empty());
        assert_eq!(registry.channel_counts().len(), 1);
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_subscribe_after_removal_fails() {
        let registry = ChannelRegistry::new();
        registry.register(5);
        registry.remove_connection(5);

        let err = registry
            .subscribe(5, &AuthState::Unauthenticated, "market_data")
            .unwrap_err();
        assert_eq!(err, GatewayError::ConnectionClosed(5));
        assert!(registry.subscribers_of("market_data").is_empty());
    }

    #[test]
    fn test_concurrent_churn_stays_consistent() {
        let registry = Arc::new(ChannelRegistry::new());
        let channels = ["market_data", "system_status", "market_data:ETH"];

        let handles: Vec<_> = (0..8u64)
            .map(|id| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.register(id);
                    for round in 0..200 {
                        let channel = channels[(round + id as usize) % channels.len()];
                        registry
                            .subscribe(id, &AuthState::Unauthenticated, channel)
                            .unwrap();
                        if round % 3 == 0 {
                            registry.unsubscribe(id, channel);
                        }
                        let _ = registry.subscribers_of(channel);
                    }
                    if id % 2 == 0 {
                        registry.remove_connection(id);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(registry.is_consistent());
        for id in (0..8u64).step_by(2) {
            assert!(registry.subscriptions_of(id).is_empty());
            for channel in channels {
                assert!(!registry.subscribers_of(channel).contains(&id));
            }
        }
    }
}
