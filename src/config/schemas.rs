// Gateway configuration schema

use std::collections::HashMap;

use crate::config_struct;

config_struct! {
    /// HTTP/WebSocket listener
    pub struct ServerConfig {
        /// Host/IP to bind (0.0.0.0 for all interfaces)
        host: String = "127.0.0.1".to_string(),
        /// Port to bind (0 picks a free port)
        port: u16 = 9090,
    }
}

config_struct! {
    /// Credential verification
    pub struct AuthConfig {
        /// Base64 ed25519 verifying key used to check client tokens
        public_key: String = String::new(),
        /// Seconds a fresh connection may stay unauthenticated
        grace_period_secs: u64 = 10,
        /// Clock skew tolerated when checking `exp`
        leeway_secs: u64 = 5,
    }
}

config_struct! {
    /// Per-connection token bucket for inbound messages
    pub struct RateLimitConfig {
        /// Bucket size (burst allowance)
        capacity: u32 = 20,
        /// One token is refilled every interval
        refill_interval_ms: u64 = 100,
        /// Consecutive rejections that close the connection
        max_violations: u32 = 10,
        /// Rejections older than this no longer count toward the streak
        violation_window_secs: u64 = 10,
    }
}

config_struct! {
    /// Per-connection outbound queue
    pub struct QueueConfig {
        /// Pending messages per connection before the drop policy applies
        capacity: usize = 256,
        /// Best-effort flush budget when a connection is torn down
        drain_timeout_ms: u64 = 500,
    }
}

config_struct! {
    /// Dispatcher throttling
    pub struct ThrottleConfig {
        /// Minimum interval between emissions on a channel (0 = unthrottled)
        default_interval_ms: u64 = 100,
        /// Discrete events delivered per window before they queue
        max_burst: usize = 10,
        /// Queued discrete events per channel before the oldest is dropped
        backlog_capacity: usize = 1000,
        /// Per-channel interval overrides
        channel_intervals_ms: HashMap<String, u64> = HashMap::new(),
    }
}

config_struct! {
    /// Heartbeat and liveness
    pub struct HealthConfig {
        /// Seconds between heartbeat sweeps
        heartbeat_interval_secs: u64 = 30,
        /// Unanswered heartbeat pings before a connection is evicted
        max_missed_heartbeats: u32 = 3,
        /// Publish a stats snapshot on `system_status` this often (0 = off)
        status_interval_secs: u64 = 0,
    }
}

config_struct! {
    /// Root configuration
    pub struct Config {
        server: ServerConfig = ServerConfig::default(),
        auth: AuthConfig = AuthConfig::default(),
        rate_limit: RateLimitConfig = RateLimitConfig::default(),
        queue: QueueConfig = QueueConfig::default(),
        throttle: ThrottleConfig = ThrottleConfig::default(),
        health: HealthConfig = HealthConfig::default(),
    }
}

impl ThrottleConfig {
    /// Effective interval for a channel, honoring overrides
    pub fn interval_for(&self, channel: &str) -> u64 {
        self.channel_intervals_ms
            .get(channel)
            .copied()
            .unwrap_or(self.default_interval_ms)
    }
}
