//! Exporter server binary.
//!
//! Connects to the node daemon's websocket, routes its events into
//! per-service metric handlers and exposes the result over HTTP:
//!
//! - `GET /metrics`
//! - `GET /healthz`
//!
//! A daemon that cannot be reached at startup is fatal. A request
//! transport that cannot be built only disables the polled metrics.

mod config;
mod routes;
mod state;

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use exporter::{
    Dispatcher, ExporterError, HttpClient, MetricsRegistry, RequestTransport, StreamTransport,
    WebsocketClient,
};
use config::Cli;
use state::{AppState, SharedState};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "exporter={level},exporter_server={level}",
            level = cli.log_level
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli).await {
        error!("fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), ExporterError> {
    let cfg = cli.into_config();

    // ---------------------------
    // Transports
    // ---------------------------

    info!(url = %cfg.daemon.url(), "connecting to daemon");
    let stream: Arc<dyn StreamTransport> = Arc::new(WebsocketClient::connect(&cfg.daemon).await?);

    let requester: Option<Arc<dyn RequestTransport>> = match HttpClient::new(&cfg.rpc) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            error!("failed to create RPC client, polled metrics disabled: {e}");
            None
        }
    };

    // ---------------------------
    // Metrics + dispatcher
    // ---------------------------

    let registry = MetricsRegistry::new(cfg.metrics.namespace.clone());
    let listen_addr = cfg.metrics.listen_addr;
    let dispatcher = Dispatcher::new(registry.clone(), cfg, stream, requester)?;
    dispatcher.open_stream().await?;

    // ---------------------------
    // HTTP server
    // ---------------------------

    let state: SharedState = Arc::new(AppState { registry });
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(ExporterError::Server)?;
    info!("metrics exporter listening on http://{listen_addr}/metrics");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ExporterError::Server);

    if let Err(e) = dispatcher.close().await {
        warn!("error closing daemon stream: {e}");
    }
    served
}

/// Waits for Ctrl-C and returns, used for graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!("could not listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
