/// Error taxonomy for the gateway
///
/// Per-request errors are reported to the originating connection and leave it
/// open; connection-fatal errors close only the offending connection.
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::gateway::ConnectionId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Authentication failed: {reason}")]
    AuthError { reason: String },

    #[error("Not authorized to subscribe to '{channel}'")]
    Unauthorized { channel: String },

    #[error("Unknown channel '{channel}'")]
    UnknownChannel { channel: String },

    #[error("Rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("No heartbeat response after {missed} pings")]
    HeartbeatTimeout { missed: u32 },

    #[error("Outbound queue full, dropped a '{message_type}' message")]
    QueueOverflow { message_type: String },

    #[error("Connection is already authenticated")]
    AlreadyAuthenticated,

    #[error("Invalid message: {reason}")]
    InvalidMessage { reason: String },

    #[error("Connection {0} is closed")]
    ConnectionClosed(ConnectionId),
}

impl GatewayError {
    /// Stable machine-readable code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::AuthError { .. } => "auth_error",
            GatewayError::Unauthorized { .. } => "unauthorized",
            GatewayError::UnknownChannel { .. } => "unknown_channel",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::HeartbeatTimeout { .. } => "heartbeat_timeout",
            GatewayError::QueueOverflow { .. } => "queue_overflow",
            GatewayError::AlreadyAuthenticated => "already_authenticated",
            GatewayError::InvalidMessage { .. } => "invalid_message",
            GatewayError::ConnectionClosed(_) => "connection_closed",
        }
    }

    /// Whether the error terminates the connection it occurred on
    ///
    /// `RateLimited` is only fatal once the violation streak escalates, which
    /// the gateway decides separately.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::AuthError { .. } | GatewayError::HeartbeatTimeout { .. }
        )
    }

    pub fn auth(reason: impl Into<String>) -> Self {
        GatewayError::AuthError {
            reason: reason.into(),
        }
    }

    pub fn invalid_message(reason: impl Into<String>) -> Self {
        GatewayError::InvalidMessage {
            reason: reason.into(),
        }
    }
}

/// Why a connection was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    ClientClosed,
    AuthError,
    AuthTimeout,
    RateLimited,
    HeartbeatTimeout,
    TransportError,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ClientClosed => "client_closed",
            DisconnectReason::AuthError => "auth_error",
            DisconnectReason::AuthTimeout => "auth_timeout",
            DisconnectReason::RateLimited => "rate_limited",
            DisconnectReason::HeartbeatTimeout => "heartbeat_timeout",
            DisconnectReason::TransportError => "transport_error",
            DisconnectReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
