/// Centralized argument handling for the gateway binary
///
/// - Global CMD_ARGS storage with thread-safe access
/// - Flag and value lookups shared by the logger and `main`
/// - Help output
use once_cell::sync::Lazy;
use std::env;
use std::sync::Mutex;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/streamgate.toml";

/// Global command-line arguments storage
pub static CMD_ARGS: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(env::args().collect()));

/// Override the stored arguments (tests and tools)
pub fn set_cmd_args(args: Vec<String>) {
    if let Ok(mut cmd_args) = CMD_ARGS.lock() {
        *cmd_args = args;
    }
}

/// Copy of the current command-line arguments
pub fn get_cmd_args() -> Vec<String> {
    match CMD_ARGS.lock() {
        Ok(args) => args.clone(),
        Err(_) => env::args().collect(),
    }
}

/// Checks if a specific argument is present in the command line
pub fn has_arg(arg: &str) -> bool {
    get_cmd_args().iter().any(|a| a == arg)
}

/// Value following a flag, e.g. `--config path.toml`
pub fn get_arg_value(flag: &str) -> Option<String> {
    let args = get_cmd_args();
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

// =============================================================================
// DEBUG FLAGS
// =============================================================================

pub fn is_debug_gateway_enabled() -> bool {
    has_arg("--debug-gateway")
}

pub fn is_debug_dispatcher_enabled() -> bool {
    has_arg("--debug-dispatcher")
}

pub fn is_debug_health_enabled() -> bool {
    has_arg("--debug-health")
}

/// Debug modes named on the command line (`--debug-<tag>`)
pub fn get_enabled_debug_modes() -> Vec<String> {
    get_cmd_args()
        .iter()
        .filter_map(|a| a.strip_prefix("--debug-").map(str::to_string))
        .collect()
}

// =============================================================================
// COMMON PATTERNS
// =============================================================================

pub fn is_help_requested() -> bool {
    has_arg("--help") || has_arg("-h")
}

/// Config path from `--config`, falling back to the default location
pub fn get_config_path() -> String {
    get_arg_value("--config").unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

/// Displays the help menu
pub fn print_help() {
    println!("streamgate - real-time event gateway");
    println!();
    println!("USAGE:");
    println!("    streamgate [FLAGS]");
    println!();
    println!("FLAGS:");
    println!("    --config <path>           Configuration file (default: {})", DEFAULT_CONFIG_PATH);
    println!("    --log-file <path>         Also append log lines to this file");
    println!("    --log-level <level>       error | warning | info | debug | verbose");
    println!("    --log-tags <a,b>          Only print these tags (errors always print)");
    println!("    --quiet                   Errors only");
    println!("    --verbose                 Everything, including verbose traces");
    println!("    --help, -h                Show this help message");
    println!();
    println!("DEBUG FLAGS:");
    println!("    --debug-all               Every subsystem below");
    println!("    --debug-gateway           Connection lifecycle and inbound routing");
    println!("    --debug-auth              Credential verification");
    println!("    --debug-registry          Subscribe/unsubscribe bookkeeping");
    println!("    --debug-rate-limit        Token bucket decisions");
    println!("    --debug-dispatcher        Throttle windows and fan-out");
    println!("    --debug-health            Heartbeat sweeps and evictions");
    println!("    --debug-webserver         HTTP/WebSocket transport");
    println!();
    println!("EXAMPLES:");
    println!("    streamgate --config /etc/streamgate.toml");
    println!("    streamgate --debug-dispatcher --debug-health");
}
