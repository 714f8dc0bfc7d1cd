//! Host-facing mail entry point.
//!
//! With the outbox enabled every message goes through [`Outbox`]; with it
//! disabled the configured transport is called directly and its error is
//! returned to the caller.

use std::sync::Arc;

use tokio::time::timeout;
use tracing::info;

use crate::config::Config;
use crate::dedupe::fingerprint;
use crate::dispatch::FlushHandle;
use crate::error::{OutboxResult, TransportError};
use crate::outbox::{Outbox, SendReceipt};
use crate::transport::{Envelope, Transport};

/// What happened to a message handed to [`Mailer::send`].
#[derive(Debug)]
pub enum Delivery {
    /// Delivered synchronously, nothing was stored
    Sent,
    /// Stored in the outbox
    Queued(SendReceipt),
}

pub enum Mailer {
    Direct {
        transport: Arc<dyn Transport>,
        send_timeout: std::time::Duration,
    },
    Queued(Outbox),
}

impl Mailer {
    /// Build the mailer selected by `OUTBOX_ENABLED`.
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> OutboxResult<Self> {
        if config.outbox_enabled {
            return Ok(Mailer::Queued(Outbox::open(config, transport)?));
        }

        info!(transport = transport.name(), "mailer_direct_mode");
        Ok(Mailer::Direct {
            transport,
            send_timeout: config.send_timeout(),
        })
    }

    /// Send `content`, or queue it when the outbox is enabled.
    pub async fn send(&self, content: impl AsRef<[u8]>) -> OutboxResult<Delivery> {
        let content = content.as_ref();

        match self {
            Mailer::Direct {
                transport,
                send_timeout,
            } => {
                let envelope = Envelope::new(fingerprint(content), content);
                timeout(*send_timeout, transport.send(&envelope))
                    .await
                    .map_err(|_| TransportError::Timeout(*send_timeout))??;

                info!(id = %envelope.id, "mailer_direct_sent");
                Ok(Delivery::Sent)
            }
            Mailer::Queued(outbox) => Ok(Delivery::Queued(outbox.send(content, false)?)),
        }
    }

    /// Number of queued messages, `None` in direct mode.
    pub fn queue_size(&self) -> OutboxResult<Option<usize>> {
        match self {
            Mailer::Direct { .. } => Ok(None),
            Mailer::Queued(outbox) => outbox.count_pending().map(Some),
        }
    }

    /// Flush the outbox; does nothing in direct mode.
    pub fn flush(&self) -> OutboxResult<Option<FlushHandle>> {
        match self {
            Mailer::Direct { .. } => Ok(None),
            Mailer::Queued(outbox) => outbox.flush().map(Some),
        }
    }

    pub fn outbox(&self) -> Option<&Outbox> {
        match self {
            Mailer::Direct { .. } => None,
            Mailer::Queued(outbox) => Some(outbox),
        }
    }

    /// Wait for background attempts before the process exits.
    pub async fn shutdown(self) {
        if let Mailer::Queued(outbox) = self {
            outbox.close().await;
        }
    }
}
