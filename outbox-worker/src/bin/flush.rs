//! Outbox Flush - one-shot recovery of queued messages.
//!
//! This binary:
//! 1. Opens the outbox store
//! 2. Attempts delivery of every queued message, regardless of queue-only mode
//! 3. Waits for all attempts and reports what is still queued
//!
//! Exits non-zero when messages remain queued, so it can drive a cron retry.

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use outbox::{build_transport, Config, Outbox};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("flush_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        db_path = %config.db_path.display(),
        transport = ?config.transport,
        send_timeout_ms = config.send_timeout_ms,
        "config_loaded"
    );

    let transport = build_transport(&config).context("Failed to build transport")?;
    let outbox = Outbox::open(&config, transport).context("Failed to open outbox")?;

    let report = outbox.flush().context("Failed to list queued messages")?.wait().await;
    let remaining = outbox.count_pending().context("Failed to count queued messages")?;

    outbox.close().await;

    info!(
        delivered = report.delivered,
        failed = report.failed,
        aborted = report.aborted,
        remaining = remaining,
        "flush_finished"
    );

    if remaining > 0 {
        warn!(remaining = remaining, "flush_left_messages_queued");
        bail!("{} message(s) still queued", remaining);
    }

    Ok(())
}
