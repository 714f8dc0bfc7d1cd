//! Read-only views over queued messages.
//!
//! Views are derived by parsing each stored message. A record whose content
//! cannot be parsed still appears, with empty header fields.

pub mod email_parser;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::error::{OutboxError, OutboxResult};
use crate::store::{MessageRecord, Store};

pub use email_parser::{excerpt, parse_raw_email, ParsedEmail};

/// Default number of body characters in a view.
pub const DEFAULT_EXCERPT_CHARS: usize = 120;

/// Summary of a queued message for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordView {
    pub id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body_excerpt: String,
    /// Date header as written by the sender
    pub date: String,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Read-only queries used by the HTTP API and the binaries.
#[derive(Clone)]
pub struct QueryService {
    store: Store,
    excerpt_chars: usize,
}

impl QueryService {
    pub fn new(store: Store, excerpt_chars: usize) -> Self {
        Self {
            store,
            excerpt_chars,
        }
    }

    /// Every queued message, oldest first.
    pub fn list_pending(&self) -> OutboxResult<Vec<RecordView>> {
        let records = self.store.list_all()?;
        Ok(records.iter().map(|r| self.view_or_degraded(r)).collect())
    }

    pub fn count_pending(&self) -> OutboxResult<usize> {
        self.store.count()
    }

    /// Views for the queued messages among `ids`, in listing order.
    ///
    /// Unknown ids are ignored.
    pub fn lookup(&self, ids: &HashSet<String>) -> OutboxResult<Vec<RecordView>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.store.list_all()?;
        Ok(records
            .iter()
            .filter(|r| ids.contains(&r.id))
            .map(|r| self.view_or_degraded(r))
            .collect())
    }

    /// Parse a record into a view.
    pub fn view(&self, record: &MessageRecord) -> OutboxResult<RecordView> {
        let parsed = parse_raw_email(&record.content).map_err(|e| OutboxError::MalformedRecord {
            id: record.id.clone(),
            reason: format!("{:#}", e),
        })?;

        Ok(RecordView {
            id: record.id.clone(),
            from: parsed.from.unwrap_or_default(),
            to: parsed.to.unwrap_or_default(),
            subject: parsed.subject.unwrap_or_default(),
            body_excerpt: parsed
                .body
                .map(|b| excerpt(&b, self.excerpt_chars))
                .unwrap_or_default(),
            date: parsed.date.unwrap_or_default(),
            created_at: record.created_at,
            last_error: record.last_error.clone(),
        })
    }

    fn view_or_degraded(&self, record: &MessageRecord) -> RecordView {
        match self.view(record) {
            Ok(view) => view,
            Err(e) => {
                warn!(id = %record.id, error = %e, "query_record_malformed");
                degraded_view(record, self.excerpt_chars)
            }
        }
    }
}

/// View of a record whose content did not parse: no header fields, raw excerpt.
fn degraded_view(record: &MessageRecord, excerpt_chars: usize) -> RecordView {
    RecordView {
        id: record.id.clone(),
        from: String::new(),
        to: String::new(),
        subject: String::new(),
        body_excerpt: excerpt(&String::from_utf8_lossy(&record.content), excerpt_chars),
        date: String::new(),
        created_at: record.created_at,
        last_error: record.last_error.clone(),
    }
}
