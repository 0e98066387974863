//! Real-time event gateway
//!
//! Layering, leaves first:
//!
//! - `rate_limit` - per-connection token buckets for inbound messages
//! - `registry` - channel ↔ connection membership, authorization via `channels`
//! - `hub` - the `Gateway`: connection lifecycle, auth, routing, outbound queues
//! - `dispatcher` - producer entry point, throttling/coalescing, fan-out
//! - `health` - heartbeats, eviction, liveness stats
//!
//! Components are explicitly owned and passed as `Arc`s; there is no global
//! gateway state.

pub mod auth;
pub mod channels;
pub mod connection;
pub mod dispatcher;
pub mod health;
pub mod hub;
pub mod message;
pub mod metrics;
pub(crate) mod queue;
pub mod rate_limit;
pub mod registry;

/// Connection ID (unique for the process lifetime)
pub type ConnectionId = u64;

pub use auth::{AuthState, Claims, Identity, Role, TokenIssuer, TokenVerifier};
pub use channels::{resolve_policy, AccessPolicy};
pub use connection::{Connection, ConnectionSnapshot};
pub use dispatcher::{BroadcastDispatcher, DispatchStats, PublishOutcome};
pub use health::{HealthMonitor, HealthStats};
pub use hub::{Gateway, LifecycleEvent};
pub use message::{ClientRequest, Envelope, Event, EventKind, MessageType};
pub use queue::PushOutcome;
pub use registry::{ChannelRegistry, SubscribeOutcome};
