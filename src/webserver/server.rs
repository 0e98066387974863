/// Axum webserver implementation
///
/// Main server lifecycle management including startup, shutdown, and graceful termination
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::{
    config::ServerConfig,
    logger::{self, LogTag},
    webserver::{routes, state::AppState},
};

/// Global shutdown notifier
static SHUTDOWN_NOTIFY: once_cell::sync::Lazy<Arc<Notify>> =
    once_cell::sync::Lazy::new(|| Arc::new(Notify::new()));

/// Set once shutdown was requested, for waiters that arrive late
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Start the webserver
///
/// This function blocks until `shutdown()` is called
pub async fn start_server(state: Arc<AppState>, config: &ServerConfig) -> Result<(), String> {
    let listener = bind(config).await?;
    serve(listener, state, wait_for_shutdown()).await
}

/// Bind the listener for the configured address
pub async fn bind(config: &ServerConfig) -> Result<TcpListener, String> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid bind address: {}", e))?;

    TcpListener::bind(&addr).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::AddrInUse => format!(
            "Failed to bind to {}: Address already in use\n\
             \n\
             Another gateway instance is probably running on this port.\n\
             Stop it or change server.port in the configuration.",
            addr
        ),
        std::io::ErrorKind::PermissionDenied => format!(
            "Failed to bind to {}: Permission denied\n\
             \n\
             Port {} requires elevated privileges on this system.\n\
             Consider using a port above 1024 or running with appropriate permissions.",
            addr, config.port
        ),
        _ => format!("Failed to bind to {}: {}", addr, e),
    })
}

/// Serve on an already-bound listener until `shutdown` resolves
///
/// Open connections are told to close with reason `shutdown` before the
/// listener stops.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), String> {
    let addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to read listener address: {}", e))?;
    logger::info(
        LogTag::Webserver,
        &format!("Gateway listening on ws://{}/ws", addr),
    );

    let gateway = Arc::clone(&state.gateway);
    let app = build_app(state);

    let shutdown_signal = async move {
        shutdown.await;
        logger::info(
            LogTag::Webserver,
            "Received shutdown signal, closing connections...",
        );
        let closed = gateway.shutdown_all();
        logger::debug(
            LogTag::Webserver,
            &format!("Closed {} connection(s)", closed),
        );
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| format!("Server error: {}", e))?;

    logger::info(LogTag::Webserver, "Webserver stopped gracefully");
    Ok(())
}

/// Trigger shutdown of the server and every task waiting on it
pub fn shutdown() {
    logger::debug(LogTag::Webserver, "Triggering webserver shutdown...");
    SHUTDOWN_REQUESTED.store(true, Ordering::Release);
    SHUTDOWN_NOTIFY.notify_waiters();
}

/// Resolves once `shutdown()` has been called
pub async fn wait_for_shutdown() {
    loop {
        let notified = SHUTDOWN_NOTIFY.notified();
        if SHUTDOWN_REQUESTED.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }
}

/// Build the Axum application with all routes and middleware
pub fn build_app(state: Arc<AppState>) -> Router {
    routes::create_router(state).layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
}
