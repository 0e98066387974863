use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use streamgate::{
    arguments::{get_config_path, get_enabled_debug_modes, is_help_requested, print_help},
    config,
    gateway::{BroadcastDispatcher, ChannelRegistry, Gateway, HealthMonitor, TokenVerifier},
    logger::{self, LogTag},
    webserver::{self, state::AppState},
};

/// Main entry point for the gateway
///
/// Loads configuration, wires the gateway components together, and serves
/// until Ctrl+C.
#[tokio::main]
async fn main() {
    logger::init();

    if is_help_requested() {
        print_help();
        std::process::exit(0);
    }

    if let Err(e) = run().await {
        logger::error(LogTag::System, &format!("Fatal: {:#}", e));
        logger::flush();
        std::process::exit(1);
    }

    logger::flush();
}

async fn run() -> Result<()> {
    logger::info(LogTag::System, "🚀 streamgate starting up...");

    let debug_modes = get_enabled_debug_modes();
    if !debug_modes.is_empty() {
        logger::info(
            LogTag::System,
            &format!("Debug modes enabled: {}", debug_modes.join(", ")),
        );
    }

    // =========================================================================
    // CONFIGURATION
    // =========================================================================

    let config_path = get_config_path();
    config::load_config_from_path(&config_path).map_err(|e| anyhow!(e))?;
    let config = config::get_config_clone();
    logger::info(
        LogTag::Config,
        &format!("Configuration loaded from {}", config_path),
    );

    if config.auth.public_key.trim().is_empty() {
        return Err(anyhow!(
            "auth.public_key is not set; generate a key pair with `tool_issue_token keygen`"
        ));
    }
    let verifier = TokenVerifier::from_base64(&config.auth.public_key, config.auth.leeway_secs)
        .map_err(|e| anyhow!(e))
        .context("Failed to load token verifier")?;

    // =========================================================================
    // COMPONENTS
    // =========================================================================

    let registry = Arc::new(ChannelRegistry::new());
    let gateway = Gateway::new(&config, registry, verifier);
    let dispatcher = BroadcastDispatcher::new(Arc::clone(&gateway), config.throttle.clone());
    let monitor = HealthMonitor::new(
        Arc::clone(&gateway),
        Arc::clone(&dispatcher),
        config.health.clone(),
    );

    let monitor_handle = tokio::spawn(Arc::clone(&monitor).run(webserver::wait_for_shutdown()));

    ctrlc::set_handler(|| {
        logger::info(LogTag::System, "🛑 Shutdown requested (Ctrl+C)");
        webserver::shutdown();
    })
    .context("Failed to install Ctrl+C handler")?;

    // =========================================================================
    // SERVE
    // =========================================================================

    let state = Arc::new(AppState::new(Arc::clone(&gateway), dispatcher, monitor));
    let served = webserver::start_server(state, &config.server).await;

    // Make sure background tasks stop even when the server failed to start
    webserver::shutdown();
    gateway.shutdown_all();
    if let Err(e) = monitor_handle.await {
        logger::warning(LogTag::System, &format!("Health monitor task failed: {}", e));
    }

    served.map_err(|e| anyhow!(e))?;
    logger::info(LogTag::System, "✅ streamgate stopped");
    Ok(())
}
