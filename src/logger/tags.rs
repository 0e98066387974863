/// Log tags identify the subsystem a message comes from.
///
/// Each tag maps to a `--debug-<key>` command-line flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    System,
    Config,
    Webserver,
    Gateway,
    Auth,
    Registry,
    RateLimit,
    Dispatcher,
    Health,
}

impl LogTag {
    /// Key used in `--debug-<key>` / `--verbose-<key>` flags
    pub fn to_debug_key(&self) -> String {
        match self {
            LogTag::System => "system",
            LogTag::Config => "config",
            LogTag::Webserver => "webserver",
            LogTag::Gateway => "gateway",
            LogTag::Auth => "auth",
            LogTag::Registry => "registry",
            LogTag::RateLimit => "rate-limit",
            LogTag::Dispatcher => "dispatcher",
            LogTag::Health => "health",
        }
        .to_string()
    }

    /// Uncolored label written to the log file
    pub fn to_plain_string(&self) -> String {
        match self {
            LogTag::System => "SYSTEM",
            LogTag::Config => "CONFIG",
            LogTag::Webserver => "WEBSERVER",
            LogTag::Gateway => "GATEWAY",
            LogTag::Auth => "AUTH",
            LogTag::Registry => "REGISTRY",
            LogTag::RateLimit => "RATELIMIT",
            LogTag::Dispatcher => "DISPATCH",
            LogTag::Health => "HEALTH",
        }
        .to_string()
    }
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_plain_string())
    }
}
