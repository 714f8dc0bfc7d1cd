//! SQLite-backed outbox store.
//!
//! Connections come from an r2d2 pool over a WAL-mode database, so the
//! submission path and any number of delivery tasks can use the store at the
//! same time. Every write runs inside a SQLite transaction; there is no lock
//! on the Rust side.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{FromSqlError, Type, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info, warn};

use super::types::{format_timestamp, MessageRecord, Upsert};
use crate::error::{OutboxError, OutboxResult};

const PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA busy_timeout = 5000;
";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS outbox (
        id TEXT PRIMARY KEY,
        content BLOB NOT NULL,
        created_at TEXT NOT NULL,
        last_error TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_outbox_created_at
        ON outbox(created_at, id);
";

const SELECT_COLUMNS: &str = "SELECT id, content, created_at, last_error FROM outbox";

/// Durable table of queued messages keyed by content fingerprint.
#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
    path: String,
}

impl Store {
    /// Open (or create) the store at `path`.
    ///
    /// A bootstrap connection checks that the file can be opened and creates the
    /// schema before the pool is built, so a bad path fails fast with
    /// `StorageUnavailable` instead of waiting out the pool timeout.
    pub fn open(path: &Path, pool_size: u32) -> OutboxResult<Self> {
        let path_str = path.to_string_lossy().to_string();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                OutboxError::StorageUnavailable(format!("{}: {}", parent.display(), e))
            })?;
        }

        let unavailable = |e: rusqlite::Error| {
            OutboxError::StorageUnavailable(format!("{}: {}", path_str, e))
        };

        let bootstrap = Connection::open(path).map_err(unavailable)?;
        bootstrap.execute_batch(PRAGMAS).map_err(unavailable)?;
        create_schema(&bootstrap).map_err(unavailable)?;
        drop(bootstrap);

        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.execute_batch(PRAGMAS));

        let pool = Pool::builder()
            .max_size(pool_size)
            .min_idle(Some(1))
            .connection_timeout(Duration::from_secs(10))
            .build(manager)
            .map_err(|e| OutboxError::StorageUnavailable(format!("{}: {}", path_str, e)))?;

        info!(path = %path_str, pool_size = pool_size, "outbox_store_opened");

        Ok(Self {
            pool,
            path: path_str,
        })
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn conn(&self) -> OutboxResult<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| OutboxError::StorageUnavailable(e.to_string()))
    }

    /// Create the outbox table if it does not exist. Safe to call repeatedly.
    pub fn ensure_schema(&self) -> OutboxResult<()> {
        let conn = self.conn()?;
        create_schema(&conn)?;
        Ok(())
    }

    /// Insert a record unless one with the same id is already queued.
    ///
    /// An existing row keeps its content, `created_at` and `last_error`.
    /// Content is stored as a BLOB, byte for byte.
    pub fn upsert_if_absent(
        &self,
        id: &str,
        content: impl AsRef<[u8]>,
        now: DateTime<Utc>,
    ) -> OutboxResult<Upsert> {
        let content = content.as_ref();
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO outbox (id, content, created_at, last_error)
             VALUES (?1, ?2, ?3, NULL)",
            params![id, content, format_timestamp(now)],
        )? > 0;

        let record = tx.query_row(
            &format!("{} WHERE id = ?1", SELECT_COLUMNS),
            params![id],
            row_to_record,
        )?;

        tx.commit()?;

        if inserted {
            info!(id = %id, content_length = content.len(), "outbox_record_inserted");
            Ok(Upsert::Inserted(record))
        } else {
            debug!(id = %id, "outbox_record_already_queued");
            Ok(Upsert::Existing(record))
        }
    }

    /// Fetch a single record.
    pub fn get(&self, id: &str) -> OutboxResult<Option<MessageRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// All records, oldest first, ties broken by id.
    pub fn list_all(&self) -> OutboxResult<Vec<MessageRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY created_at ASC, id ASC", SELECT_COLUMNS))?;

        let records = stmt
            .query_map([], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Number of queued records.
    pub fn count(&self) -> OutboxResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Record the reason of a failed attempt. Returns false if `id` is not queued.
    pub fn set_error(&self, id: &str, message: &str) -> OutboxResult<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE outbox SET last_error = ?2 WHERE id = ?1",
            params![id, message],
        )?;

        if updated == 0 {
            warn!(id = %id, "outbox_set_error_missing_record");
        }
        Ok(updated > 0)
    }

    /// Remove a record. Returns false if `id` was not queued.
    pub fn delete(&self, id: &str) -> OutboxResult<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM outbox WHERE id = ?1", params![id])?;
        debug!(id = %id, deleted = deleted > 0, "outbox_record_deleted");
        Ok(deleted > 0)
    }
}

fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    let created_at: String = row.get(2)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
        })?;

    Ok(MessageRecord {
        id: row.get(0)?,
        content: content_bytes(row.get_ref(1)?)?,
        created_at,
        last_error: row.get(3)?,
    })
}

/// Content column as bytes. Rows written as TEXT by older builds are accepted.
fn content_bytes(value: ValueRef<'_>) -> rusqlite::Result<Vec<u8>> {
    match value {
        ValueRef::Blob(bytes) | ValueRef::Text(bytes) => Ok(bytes.to_vec()),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            1,
            other.data_type(),
            Box::new(FromSqlError::InvalidType),
        )),
    }
}
