//! Channel names and their access policies
//!
//! The policy is derived from the name alone, once, at subscribe time.

use super::auth::AuthState;
use crate::errors::GatewayError;

/// Public literal channels
pub const PUBLIC_CHANNELS: &[&str] = &["market_data", "system_status"];

/// Channels open to any authenticated session
pub const AUTHENTICATED_CHANNELS: &[&str] = &["signals", "trade_executions"];

/// Channels restricted to admin / super_admin
pub const ADMIN_CHANNELS: &[&str] = &["admin", "risk_alerts"];

/// Per-symbol public market data: `market_data:<SYMBOL>`
pub const MARKET_DATA_PREFIX: &str = "market_data:";

/// User-scoped prefixes: `<prefix><user_id>`
pub const USER_SCOPED_PREFIXES: &[&str] = &["user:", "positions:", "alerts:"];

const MAX_SUFFIX_LEN: usize = 64;

/// Access policy of a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPolicy {
    Public,
    Authenticated,
    UserScoped(String),
    AdminOnly,
}

impl AccessPolicy {
    /// Does this auth state satisfy the policy?
    pub fn permits(&self, auth: &AuthState) -> bool {
        match self {
            AccessPolicy::Public => true,
            AccessPolicy::Authenticated => auth.is_authenticated(),
            AccessPolicy::UserScoped(owner) => auth
                .identity()
                .map(|identity| &identity.user_id == owner)
                .unwrap_or(false),
            AccessPolicy::AdminOnly => auth
                .identity()
                .map(|identity| identity.role.is_admin())
                .unwrap_or(false),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AccessPolicy::Public => "public",
            AccessPolicy::Authenticated => "authenticated",
            AccessPolicy::UserScoped(_) => "user_scoped",
            AccessPolicy::AdminOnly => "admin_only",
        }
    }
}

/// Resolve a channel name to its policy
pub fn resolve_policy(name: &str) -> Result<AccessPolicy, GatewayError> {
    if PUBLIC_CHANNELS.contains(&name) {
        return Ok(AccessPolicy::Public);
    }
    if AUTHENTICATED_CHANNELS.contains(&name) {
        return Ok(AccessPolicy::Authenticated);
    }
    if ADMIN_CHANNELS.contains(&name) {
        return Ok(AccessPolicy::AdminOnly);
    }

    if let Some(symbol) = name.strip_prefix(MARKET_DATA_PREFIX) {
        if is_valid_suffix(symbol) {
            return Ok(AccessPolicy::Public);
        }
    }

    for prefix in USER_SCOPED_PREFIXES {
        if let Some(user_id) = name.strip_prefix(prefix) {
            if is_valid_suffix(user_id) {
                return Ok(AccessPolicy::UserScoped(user_id.to_string()));
            }
        }
    }

    Err(GatewayError::UnknownChannel {
        channel: name.to_string(),
    })
}

/// Authorize `auth` for `name`: `UnknownChannel` or `Unauthorized` on failure
pub fn authorize(name: &str, auth: &AuthState) -> Result<AccessPolicy, GatewayError> {
    let policy = resolve_policy(name)?;
    if policy.permits(auth) {
        Ok(policy)
    } else {
        Err(GatewayError::Unauthorized {
            channel: name.to_string(),
        })
    }
}

/// Channel for one user's notifications
pub fn user_channel(user_id: &str) -> String {
    format!("user:{}", user_id)
}

/// Whether `user_id` can name its own user-scoped channels
pub fn is_valid_user_id(user_id: &str) -> bool {
    is_valid_suffix(user_id)
}

fn is_valid_suffix(suffix: &str) -> bool {
    !suffix.is_empty()
        && suffix.len() <= MAX_SUFFIX_LEN
        && suffix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
