//! Outbox Sendmail - drop-in `sendmail` that queues through the outbox.
//!
//! Reads one RFC 5322 message from stdin. With the outbox enabled the message
//! is stored first and a delivery attempt is made; a failed attempt leaves it
//! queued for `outbox-flush`. With the outbox disabled the transport is
//! called directly and a failure is the exit status.
//!
//! Logs go to stderr so stdout stays clean for callers.

use std::io::Read;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use outbox::{build_transport, Config, Delivery, Mailer};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true).with_writer(std::io::stderr))
        .init();

    // Load configuration from environment
    let config = Config::from_env();
    info!(
        outbox_enabled = config.outbox_enabled,
        queue_only = config.queue_only,
        transport = ?config.transport,
        "config_loaded"
    );

    let mut content = Vec::new();
    std::io::stdin()
        .read_to_end(&mut content)
        .context("Failed to read message from stdin")?;

    if content.iter().all(u8::is_ascii_whitespace) {
        bail!("No message on stdin");
    }

    let transport = build_transport(&config).context("Failed to build transport")?;
    let mailer = Mailer::from_config(&config, transport).context("Failed to open outbox")?;

    match mailer.send(&content).await.context("Failed to send message")? {
        Delivery::Sent => info!("message_sent"),
        Delivery::Queued(receipt) => {
            info!(
                id = %receipt.record.id,
                newly_queued = receipt.newly_queued,
                "message_queued"
            );

            if let Some(attempt) = receipt.attempt {
                let outcome = attempt.wait().await?;
                if let Some(error) = outcome.error() {
                    warn!(id = %outcome.id(), error = %error, "message_left_queued");
                }
            }
        }
    }

    mailer.shutdown().await;

    Ok(())
}
