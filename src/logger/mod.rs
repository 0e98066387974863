//! Structured logging for the gateway
//!
//! Same API shape everywhere in the crate:
//!
//! ```rust
//! use streamgate::logger::{self, LogTag};
//!
//! logger::error(LogTag::Gateway, "Connection task panicked");
//! logger::warning(LogTag::RateLimit, "Connection 7 exceeded its request budget");
//! logger::info(LogTag::System, "Gateway listening on 127.0.0.1:9090");
//! logger::debug(LogTag::Dispatcher, "Flushed 3 coalesced events"); // only with --debug-dispatcher
//! logger::verbose(LogTag::Registry, "Snapshot for market_data: [1, 4]"); // only with --verbose
//! ```
//!
//! `init()` scans the command line for `--debug-<tag>`, `--verbose`,
//! `--quiet` and `--log-file <path>` and must run once before services start.

mod config;
mod core;
mod file;
mod format;
mod levels;
mod tags;

pub use config::{get_logger_config, init_from_args, set_logger_config, LoggerConfig};
pub use levels::LogLevel;
pub use tags::LogTag;

/// Initialize the logger system from command-line arguments.
pub fn init() {
    config::init_from_args();
    file::init_file_logging(get_logger_config().file_path.as_deref());
}

/// Log at ERROR level (always shown)
pub fn error(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Error, message);
}

/// Log at WARNING level (shown unless --quiet)
pub fn warning(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Warning, message);
}

/// Log at INFO level
pub fn info(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Info, message);
}

/// Log at DEBUG level
///
/// Only shown when `--debug-<tag>` was passed for this tag, e.g.
/// `--debug-gateway` or `--debug-dispatcher`.
pub fn debug(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Debug, message);
}

/// Log at VERBOSE level (requires --verbose or --verbose-<tag>)
pub fn verbose(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Verbose, message);
}

/// Check whether debug output is enabled for a tag.
///
/// Lets hot paths skip building a `format!` string that would be filtered anyway.
pub fn is_debug_enabled(tag: LogTag) -> bool {
    core::should_log(&tag, LogLevel::Debug)
}

/// Force flush pending file writes (call during shutdown)
pub fn flush() {
    file::flush_file_logging();
}
