//! Record types persisted in the outbox table.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A message waiting for a successful delivery attempt.
///
/// The `id` is the fingerprint of `content`, so two identical messages
/// always map to the same row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Content fingerprint (hex SHA-256)
    pub id: String,
    /// Raw RFC 5322 message (headers + body), byte for byte as submitted
    pub content: Vec<u8>,
    /// Set on first insertion, never updated
    pub created_at: DateTime<Utc>,
    /// Reason the most recent attempt failed, if it did
    pub last_error: Option<String>,
}

/// Outcome of an insert-if-absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// A new row was written.
    Inserted(MessageRecord),
    /// A row with the same id was already queued and left untouched.
    Existing(MessageRecord),
}

impl Upsert {
    /// Whether this call created the row.
    pub fn is_inserted(&self) -> bool {
        matches!(self, Upsert::Inserted(_))
    }

    pub fn record(&self) -> &MessageRecord {
        match self {
            Upsert::Inserted(r) | Upsert::Existing(r) => r,
        }
    }

    pub fn into_record(self) -> MessageRecord {
        match self {
            Upsert::Inserted(r) | Upsert::Existing(r) => r,
        }
    }
}

/// Fixed-width RFC 3339 text, so lexical order in SQLite matches time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
