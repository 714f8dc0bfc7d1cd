//! Durable store for queued messages.
//!
//! One SQLite table, keyed by content fingerprint:
//!
//! ```text
//! outbox(id TEXT PRIMARY KEY, content BLOB, created_at TEXT, last_error TEXT NULL)
//! ```

pub mod sqlite;
pub mod types;

pub use sqlite::Store;
pub use types::{format_timestamp, MessageRecord, Upsert};
