/// Logger configuration derived from command-line flags
use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::levels::LogLevel;
use super::tags::LogTag;
use crate::arguments::{get_arg_value, get_cmd_args, has_arg};

/// Runtime logger settings
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Highest level that is printed (Info by default)
    pub min_level: LogLevel,
    /// Tags with `--debug-<tag>` enabled
    pub debug_tags: HashSet<String>,
    /// Tags with `--verbose-<tag>` enabled
    pub verbose_tags: HashSet<String>,
    /// Restrict non-error output to these tags (empty = all)
    pub enabled_tags: HashSet<String>,
    /// Append-only log file
    pub file_path: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            debug_tags: HashSet::new(),
            verbose_tags: HashSet::new(),
            enabled_tags: HashSet::new(),
            file_path: None,
        }
    }
}

static LOGGER_CONFIG: Lazy<RwLock<Arc<LoggerConfig>>> =
    Lazy::new(|| RwLock::new(Arc::new(LoggerConfig::default())));

/// Current logger configuration (cheap clone of an `Arc`)
pub fn get_logger_config() -> Arc<LoggerConfig> {
    LOGGER_CONFIG.read().clone()
}

/// Replace the logger configuration
pub fn set_logger_config(config: LoggerConfig) {
    *LOGGER_CONFIG.write() = Arc::new(config);
}

/// Build the configuration from the process arguments
pub fn init_from_args() {
    let mut config = LoggerConfig::default();

    for arg in get_cmd_args() {
        if let Some(tag) = arg.strip_prefix("--debug-") {
            config.debug_tags.insert(tag.to_string());
        } else if let Some(tag) = arg.strip_prefix("--verbose-") {
            config.verbose_tags.insert(tag.to_string());
        }
    }

    if has_arg("--verbose") {
        config.min_level = LogLevel::Verbose;
    } else if has_arg("--quiet") {
        config.min_level = LogLevel::Error;
    } else if let Some(level) = get_arg_value("--log-level").and_then(|l| LogLevel::from_str(&l)) {
        config.min_level = level;
    }

    if let Some(tags) = get_arg_value("--log-tags") {
        config.enabled_tags = tags
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
    }

    config.file_path = get_arg_value("--log-file");

    set_logger_config(config);
}

/// `--debug-<tag>` or `--debug-all`
pub fn is_debug_enabled_for_tag(tag: &LogTag) -> bool {
    let config = get_logger_config();
    config.debug_tags.contains("all") || config.debug_tags.contains(&tag.to_debug_key())
}

/// `--verbose-<tag>`
pub fn is_verbose_enabled_for_tag(tag: &LogTag) -> bool {
    get_logger_config()
        .verbose_tags
        .contains(&tag.to_debug_key())
}
