//! Broker daemon bootstrap.
//!
//! Wires the registries, dispatcher, and audit sink together, builds the
//! axum router, and serves until shutdown. Shutdown cancels every pending
//! dispatch, tells each device to disconnect, and drops the sockets.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use super::auth::{auth_middleware, load_or_create_token};
use super::connections::ConnectionRegistry;
use super::directory::DeviceDirectory;
use super::dispatcher::Dispatcher;
use super::routes::{
    BrokerState, dispatch, dispatch_raw, enroll_device, health, list_devices, mint_enroll_code,
};
use super::waiters::WaiterStore;
use super::ws::device_ws_handler;
use crate::audit::AuditLog;
use crate::config::AppConfig;
use crate::protocol::Frame;
use crate::tools::ToolRegistry;

/// Assemble the broker state from a config and a populated tool registry.
pub fn build_state(config: &AppConfig, registry: Arc<ToolRegistry>) -> Result<BrokerState, String> {
    let audit = Arc::new(
        AuditLog::new(config.log_dir()).map_err(|e| format!("failed to open audit log: {e}"))?,
    );
    let connections = Arc::new(ConnectionRegistry::new(audit.clone()));
    let waiters = Arc::new(WaiterStore::new());
    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        connections.clone(),
        waiters.clone(),
        audit.clone(),
    ));

    Ok(BrokerState {
        connections,
        waiters,
        dispatcher,
        directory: Arc::new(DeviceDirectory::new()),
        audit,
        config: config.broker.clone(),
    })
}

/// Build the full router over `state`.
pub fn build_router(state: BrokerState) -> Router {
    let protected = Router::new()
        .route("/api/v1/dispatch", post(dispatch))
        .route("/api/v1/execute_raw", post(dispatch_raw))
        .route("/api/v1/devices", get(list_devices))
        .route("/api/v1/enroll_codes", post(mint_enroll_code))
        .layer(middleware::from_fn(auth_middleware))
        .with_state(state.clone());

    let public = Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/enroll", post(enroll_device))
        .route("/ws/device/:device_id", get(device_ws_handler))
        .with_state(state);

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(CorsLayer::permissive()) // Restrict to operator networks in production
}

/// Start the broker and block until shutdown.
pub async fn start_broker(config: AppConfig, registry: Arc<ToolRegistry>) -> Result<(), String> {
    // Ensure the caller token exists before accepting connections.
    load_or_create_token()?;

    let state = build_state(&config, registry)?;
    let app = build_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.broker.host, config.broker.port)
        .parse()
        .map_err(|e| format!("invalid broker address: {e}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("could not bind {addr}: {e}"))?;

    log::info!("opsclaw broker listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("broker error: {e}"))?;

    shutdown(&state).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to install ctrl-c handler: {e}");
        // Without a signal handler, park forever and let the supervisor
        // kill the process.
        std::future::pending::<()>().await;
    }
    log::info!("shutdown requested");
}

/// Orderly teardown: pending dispatches observe `Cancelled`, devices are
/// told to disconnect, then every socket queue is dropped.
async fn shutdown(state: &BrokerState) {
    state.waiters.cancel_all();
    for info in state.connections.all() {
        let frame = Frame::Disconnect {
            reason: "broker shutting down".to_string(),
        };
        let _ = state.connections.send_to(&info.device_id, frame).await;
    }
    state.connections.clear();
    log::info!("broker shutdown complete");
}
