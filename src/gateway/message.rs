/// Wire protocol - envelope, event categories and client requests
///
/// Every frame in both directions is a JSON envelope:
/// `{ "type": ..., "channel": ..., "data": ..., "timestamp": ... }`
/// with `channel` omitted when it doesn't apply.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use super::auth::Identity;
use super::ConnectionId;
use crate::errors::GatewayError;

pub const PROTOCOL_VERSION: u8 = 1;

// ============================================================================
// MESSAGE TYPES
// ============================================================================

/// Outbound message discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // Control
    ConnectionAck,
    Authenticated,
    SubscriptionConfirmed,
    SubscriptionRejected,
    UnsubscriptionConfirmed,
    Error,

    // Events
    MarketData,
    Signal,
    TradeExecution,
    PositionUpdate,
    SystemStatus,
    UserAlert,
    RiskAlert,
    Heartbeat,
}

impl MessageType {
    pub fn code(&self) -> &'static str {
        match self {
            MessageType::ConnectionAck => "connection_ack",
            MessageType::Authenticated => "authenticated",
            MessageType::SubscriptionConfirmed => "subscription_confirmed",
            MessageType::SubscriptionRejected => "subscription_rejected",
            MessageType::UnsubscriptionConfirmed => "unsubscription_confirmed",
            MessageType::Error => "error",
            MessageType::MarketData => "market_data",
            MessageType::Signal => "signal",
            MessageType::TradeExecution => "trade_execution",
            MessageType::PositionUpdate => "position_update",
            MessageType::SystemStatus => "system_status",
            MessageType::UserAlert => "user_alert",
            MessageType::RiskAlert => "risk_alert",
            MessageType::Heartbeat => "heartbeat",
        }
    }

    /// Critical messages are never evicted by the outbound drop policy
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            MessageType::ConnectionAck
                | MessageType::Authenticated
                | MessageType::Error
                | MessageType::Heartbeat
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// EVENTS (producer side)
// ============================================================================

/// Producer event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MarketData,
    Signal,
    TradeExecution,
    PositionUpdate,
    SystemStatus,
    UserAlert,
    RiskAlert,
}

/// How the dispatcher treats an event inside a throttle window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Continuous metric: latest value per key wins
    Coalesce,
    /// Discrete occurrence: every event delivered, in order
    Discrete,
}

impl EventKind {
    pub fn message_type(&self) -> MessageType {
        match self {
            EventKind::MarketData => MessageType::MarketData,
            EventKind::Signal => MessageType::Signal,
            EventKind::TradeExecution => MessageType::TradeExecution,
            EventKind::PositionUpdate => MessageType::PositionUpdate,
            EventKind::SystemStatus => MessageType::SystemStatus,
            EventKind::UserAlert => MessageType::UserAlert,
            EventKind::RiskAlert => MessageType::RiskAlert,
        }
    }

    pub fn delivery(&self) -> Delivery {
        match self {
            EventKind::MarketData | EventKind::PositionUpdate | EventKind::SystemStatus => {
                Delivery::Coalesce
            }
            EventKind::Signal
            | EventKind::TradeExecution
            | EventKind::UserAlert
            | EventKind::RiskAlert => Delivery::Discrete,
        }
    }
}

/// An event handed to the dispatcher. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,

    /// Coalescing key (symbol, position id...). Falls back to `data.symbol`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    pub data: Value,

    /// Producer-assigned timestamp
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// New event stamped with the current time
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self {
            kind,
            key: None,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Identity of the slot this event occupies when coalesced
    pub fn coalesce_key(&self) -> Option<String> {
        self.key.clone().or_else(|| {
            self.data
                .get("symbol")
                .and_then(|s| s.as_str())
                .map(str::to_string)
        })
    }

    pub fn to_envelope(&self, channel: &str) -> Envelope {
        Envelope {
            kind: self.kind.message_type(),
            channel: Some(channel.to_string()),
            data: self.data.clone(),
            timestamp: self.timestamp,
        }
    }
}

// ============================================================================
// ENVELOPE (server -> client)
// ============================================================================

/// Standard message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(default)]
    pub data: Value,

    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn new(kind: MessageType, data: Value) -> Self {
        Self {
            kind,
            channel: None,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn is_critical(&self) -> bool {
        self.kind.is_critical()
    }

    pub fn is_fatal_error(&self) -> bool {
        self.kind == MessageType::Error
            && self
                .data
                .get("fatal")
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }

    /// Critical messages a newer critical one may replace when the queue is
    /// saturated: heartbeats and non-fatal errors
    pub fn is_supersedable(&self) -> bool {
        match self.kind {
            MessageType::Heartbeat => true,
            MessageType::Error => !self.is_fatal_error(),
            _ => false,
        }
    }

    pub fn connection_ack(conn_id: ConnectionId, auth_grace_secs: u64) -> Self {
        Self::new(
            MessageType::ConnectionAck,
            json!({
                "connection_id": conn_id,
                "protocol_version": PROTOCOL_VERSION,
                "authenticated": false,
                "auth_grace_secs": auth_grace_secs,
            }),
        )
    }

    pub fn authenticated(identity: &Identity) -> Self {
        Self::new(
            MessageType::Authenticated,
            json!({
                "user_id": identity.user_id,
                "role": identity.role,
            }),
        )
    }

    pub fn subscription_confirmed(channel: &str) -> Self {
        Self::new(MessageType::SubscriptionConfirmed, json!({})).with_channel(channel)
    }

    pub fn subscription_rejected(channel: &str, error: &GatewayError) -> Self {
        Self::new(
            MessageType::SubscriptionRejected,
            json!({
                "reason": error.code(),
                "message": error.to_string(),
            }),
        )
        .with_channel(channel)
    }

    pub fn unsubscription_confirmed(channel: &str, was_subscribed: bool) -> Self {
        Self::new(
            MessageType::UnsubscriptionConfirmed,
            json!({ "was_subscribed": was_subscribed }),
        )
        .with_channel(channel)
    }

    pub fn error(error: &GatewayError, fatal: bool) -> Self {
        Self::new(
            MessageType::Error,
            json!({
                "code": error.code(),
                "message": error.to_string(),
                "fatal": fatal,
            }),
        )
    }

    pub fn heartbeat(sequence: u64) -> Self {
        Self::new(MessageType::Heartbeat, json!({ "seq": sequence }))
    }

    /// Serialize to JSON text
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// CLIENT REQUESTS (client -> server)
// ============================================================================

/// Raw inbound envelope before validation
#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Validated client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Authenticate { token: String },
    Subscribe { channels: Vec<String> },
    Unsubscribe { channels: Vec<String> },
    HeartbeatAck,
}

impl ClientRequest {
    /// Parse a text frame
    ///
    /// Channel lists come from `channel`, `data.channel` and/or `data.channels`.
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        let inbound: InboundEnvelope = serde_json::from_str(text)
            .map_err(|e| GatewayError::invalid_message(format!("malformed envelope: {}", e)))?;

        match inbound.kind.as_str() {
            "authenticate" => {
                let token = inbound
                    .data
                    .get("token")
                    .and_then(|t| t.as_str())
                    .or_else(|| inbound.data.as_str())
                    .ok_or_else(|| GatewayError::auth("missing credential"))?;
                Ok(ClientRequest::Authenticate {
                    token: token.to_string(),
                })
            }
            "subscribe" => Ok(ClientRequest::Subscribe {
                channels: collect_channels(inbound.channel, &inbound.data)?,
            }),
            "unsubscribe" => Ok(ClientRequest::Unsubscribe {
                channels: collect_channels(inbound.channel, &inbound.data)?,
            }),
            "heartbeat_ack" => Ok(ClientRequest::HeartbeatAck),
            other => Err(GatewayError::invalid_message(format!(
                "unknown message type '{}'",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientRequest::Authenticate { .. } => "authenticate",
            ClientRequest::Subscribe { .. } => "subscribe",
            ClientRequest::Unsubscribe { .. } => "unsubscribe",
            ClientRequest::HeartbeatAck => "heartbeat_ack",
        }
    }
}

fn collect_channels(channel: Option<String>, data: &Value) -> Result<Vec<String>, GatewayError> {
    let mut channels: Vec<String> = channel.into_iter().collect();

    if let Some(single) = data.get("channel").and_then(|c| c.as_str()) {
        channels.push(single.to_string());
    }

    match data.get("channels") {
        Some(Value::Array(items)) => {
            for item in items {
                let name = item.as_str().ok_or_else(|| {
                    GatewayError::invalid_message("channel names must be strings")
                })?;
                channels.push(name.to_string());
            }
        }
        Some(_) => {
            return Err(GatewayError::invalid_message("'channels' must be an array"));
        }
        None => {}
    }

    // A batch naming the same channel twice is acknowledged once
    let mut seen = std::collections::HashSet::new();
    channels.retain(|c| seen.insert(c.clone()));

    if channels.is_empty() {
        return Err(GatewayError::invalid_message("no channel given"));
    }

    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_serialization() {
        let envelope = Envelope::subscription_confirmed("signals");
        let json = envelope.to_json().unwrap();
        assert!(json.contains("\"type\":\"subscription_confirmed\""));
        assert!(json.contains("\"channel\":\"signals\""));
        assert!(json.contains("\"timestamp\""));

        let ack = Envelope::connection_ack(7, 10);
        let json = ack.to_json().unwrap();
        assert!(!json.contains("\"channel\""));
        assert!(json.contains("\"connection_id\":7"));
    }

    #[test]
    fn test_critical_types() {
        assert!(MessageType::Authenticated.is_critical());
        assert!(MessageType::ConnectionAck.is_critical());
        assert!(MessageType::Heartbeat.is_critical());
        assert!(!MessageType::MarketData.is_critical());
        assert!(!MessageType::SubscriptionConfirmed.is_critical());

        let soft = Envelope::error(&GatewayError::invalid_message("bad"), false);
        let fatal = Envelope::error(&GatewayError::auth("expired"), true);
        assert!(soft.is_supersedable());
        assert!(!fatal.is_supersedable());
        assert!(fatal.is_fatal_error());
        assert!(Envelope::heartbeat(1).is_supersedable());
        assert!(!Envelope::connection_ack(1, 10).is_supersedable());
    }

    #[test]
    fn test_event_kind_delivery_policy() {
        assert_eq!(EventKind::MarketData.delivery(), Delivery::Coalesce);
        assert_eq!(EventKind::SystemStatus.delivery(), Delivery::Coalesce);
        assert_eq!(EventKind::TradeExecution.delivery(), Delivery::Discrete);
        assert_eq!(EventKind::RiskAlert.delivery(), Delivery::Discrete);
        assert_eq!(EventKind::Signal.message_type(), MessageType::Signal);
    }

    #[test]
    fn test_coalesce_key_prefers_explicit_key() {
        let tick = Event::new(EventKind::MarketData, json!({"symbol": "BTC", "price": 1.0}));
        assert_eq!(tick.coalesce_key(), Some("BTC".to_string()));

        let keyed = tick.clone().with_key("BTC-PERP");
        assert_eq!(keyed.coalesce_key(), Some("BTC-PERP".to_string()));

        let status = Event::new(EventKind::SystemStatus, json!({"ok": true}));
        assert_eq!(status.coalesce_key(), None);
    }

    #[test]
    fn test_event_envelope_keeps_producer_timestamp() {
        let ts = DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = Event::new(EventKind::TradeExecution, json!({"id": 1})).with_timestamp(ts);
        let envelope = event.to_envelope("trade_executions");
        assert_eq!(envelope.kind, MessageType::TradeExecution);
        assert_eq!(envelope.channel.as_deref(), Some("trade_executions"));
        assert_eq!(envelope.timestamp, ts);
    }

    #[test]
    fn test_parse_client_requests() {
        let auth = ClientRequest::parse(r#"{"type":"authenticate","data":{"token":"abc"}}"#).unwrap();
        assert_eq!(auth, ClientRequest::Authenticate { token: "abc".to_string() });

        let sub = ClientRequest::parse(
            r#"{"type":"subscribe","channel":"signals","data":{"channels":["market_data","signals"]}}"#,
        )
        .unwrap();
        assert_eq!(
            sub,
            ClientRequest::Subscribe {
                channels: vec!["signals".to_string(), "market_data".to_string()]
            }
        );

        let ack = ClientRequest::parse(r#"{"type":"heartbeat_ack","timestamp":"2024-01-01T00:00:00Z"}"#).unwrap();
        assert_eq!(ack, ClientRequest::HeartbeatAck);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        let err = ClientRequest::parse("not json").unwrap_err();
        assert_eq!(err.code(), "invalid_message");

        let err = ClientRequest::parse(r#"{"type":"teleport"}"#).unwrap_err();
        assert!(err.to_string().contains("teleport"));

        let err = ClientRequest::parse(r#"{"type":"subscribe","data":{}}"#).unwrap_err();
        assert_eq!(err.code(), "invalid_message");

        let err = ClientRequest::parse(r#"{"type":"authenticate","data":{}}"#).unwrap_err();
        assert_eq!(err.code(), "auth_error");
    }
}
