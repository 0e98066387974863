/// Configuration loading and access helpers
use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::RwLock;

use super::schemas::Config;
use crate::logger::{self, LogTag};

/// Global configuration instance used by the binary
pub static CONFIG: OnceCell<RwLock<Config>> = OnceCell::new();

/// Parse a configuration file, falling back to defaults when it doesn't exist
pub fn read_config_file(path: &str) -> Result<Config, String> {
    if !Path::new(path).exists() {
        logger::warning(
            LogTag::Config,
            &format!("Config file '{}' not found, using default values", path),
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file '{}': {}", path, e))?;

    let config = toml::from_str::<Config>(&contents)
        .map_err(|e| format!("Failed to parse config file '{}': {}", path, e))?;

    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a file and initialize the global CONFIG
pub fn load_config_from_path(path: &str) -> Result<(), String> {
    let config = read_config_file(path)?;

    CONFIG
        .set(RwLock::new(config))
        .map_err(|_| "Config already initialized".to_string())?;

    Ok(())
}

/// Reject values that would make a component misbehave rather than fail loudly
pub fn validate_config(config: &Config) -> Result<(), String> {
    if config.rate_limit.capacity == 0 {
        return Err("rate_limit.capacity must be at least 1".to_string());
    }
    if config.rate_limit.refill_interval_ms == 0 {
        return Err("rate_limit.refill_interval_ms must be at least 1".to_string());
    }
    if config.queue.capacity == 0 {
        return Err("queue.capacity must be at least 1".to_string());
    }
    if config.health.heartbeat_interval_secs == 0 {
        return Err("health.heartbeat_interval_secs must be at least 1".to_string());
    }
    if config.health.max_missed_heartbeats == 0 {
        return Err("health.max_missed_heartbeats must be at least 1".to_string());
    }
    if config.throttle.max_burst == 0 {
        return Err("throttle.max_burst must be at least 1".to_string());
    }
    Ok(())
}

/// Execute a function with read access to the configuration
///
/// ```ignore
/// let port = with_config(|cfg| cfg.server.port);
/// ```
pub fn with_config<F, R>(f: F) -> R
where
    F: FnOnce(&Config) -> R,
{
    let config_lock = CONFIG
        .get()
        .expect("Config not initialized. Call load_config_from_path() first.");

    let config = config_lock
        .read()
        .expect("Failed to acquire config read lock");

    f(&config)
}

/// Clone of the whole configuration, for use across await points
pub fn get_config_clone() -> Config {
    with_config(|cfg| cfg.clone())
}

/// Check if configuration has been initialized
pub fn is_config_initialized() -> bool {
    CONFIG.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.rate_limit.capacity, 20);
        assert_eq!(config.health.max_missed_heartbeats, 3);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nport = 7001\n\n[throttle]\ndefault_interval_ms = 250\n\n[throttle.channel_intervals_ms]\n\"market_data\" = 50\n"
        )
        .unwrap();

        let config = read_config_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 7001);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.throttle.interval_for("market_data"), 50);
        assert_eq!(config.throttle.interval_for("signals"), 250);
        assert_eq!(config.queue, crate::config::QueueConfig::default());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = read_config_file("/definitely/not/here.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rate_limit]\ncapacity = 0\n").unwrap();

        let err = read_config_file(file.path().to_str().unwrap()).unwrap_err();
        assert!(err.contains("rate_limit.capacity"));
    }

    #[test]
    fn test_config_serialization() {
        let toml_str = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[rate_limit]"));
    }
}
