//! Outbox - durable store-and-forward queue for outgoing email.
//!
//! This library provides shared modules for the three outbox binaries:
//! - `outbox-sendmail`: Reads one message from stdin and sends it through the outbox
//! - `outbox-web`: HTTP API for submitting, inspecting and flushing queued mail
//! - `outbox-flush`: One-shot recovery flush of everything still queued
//!
//! ## Architecture
//!
//! ```text
//! content → Deduplicator → Store (SQLite) → Dispatcher → Transport (sendmail / Mailgun)
//!                             ↑                  │
//!                             └── delete / last_error
//! ```
//!
//! A message is durable before any delivery is attempted, and stays queued
//! until a transport accepts it.

pub mod config;
pub mod dedupe;
pub mod dispatch;
pub mod error;
pub mod mailer;
pub mod outbox;
pub mod query;
pub mod store;
pub mod transport;
pub mod web;

// Re-export commonly used types
pub use config::{Config, TransportKind};
pub use dedupe::{fingerprint, Deduplicator};
pub use dispatch::{
    flush_all, AttemptHandle, AttemptOutcome, DispatchPolicy, Dispatcher, FlushCallback,
    FlushHandle, FlushReport,
};
pub use error::{OutboxError, OutboxResult, TransportError};
pub use mailer::{Delivery, Mailer};
pub use outbox::{Outbox, SendReceipt};
pub use query::{QueryService, RecordView};
pub use store::{MessageRecord, Store, Upsert};
pub use transport::{build_transport, Envelope, Transport};
pub use web::AppState;
