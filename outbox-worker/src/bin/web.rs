//! Outbox Web Server - HTTP API over the outbox.
//!
//! This binary:
//! - Opens the outbox store and the configured transport
//! - Flushes anything left queued by a previous run
//! - Serves the outbox API until SIGINT/SIGTERM
//! - Waits for in-flight delivery attempts before exiting

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use outbox::web::router;
use outbox::{build_transport, AppState, Config, Outbox};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        db_path = %config.db_path.display(),
        transport = ?config.transport,
        queue_only = config.queue_only,
        auth_configured = config.api_auth_token.is_some(),
        "config_loaded"
    );

    let transport = build_transport(&config).context("Failed to build transport")?;
    let outbox = Outbox::open(&config, transport).context("Failed to open outbox")?;

    // Recover messages left behind by a crash or a queue-only run
    if config.flush_on_startup {
        match outbox.flush() {
            Ok(handle) => {
                info!(scheduled = handle.scheduled(), "startup_flush_scheduled");
                tokio::spawn(handle.wait());
            }
            Err(e) => error!(error = %e, "startup_flush_failed"),
        }
    }

    // Create application state and router
    let state = AppState::new(config.clone(), outbox.clone());
    let app = router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Let running attempts reconcile the store before exit
    outbox.close().await;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
