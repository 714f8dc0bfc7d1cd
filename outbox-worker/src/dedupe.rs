//! Content-addressed deduplication of submitted messages.

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::OutboxResult;
use crate::store::{MessageRecord, Store, Upsert};

/// Stable fingerprint of a message: hex SHA-256 over its exact bytes.
pub fn fingerprint(content: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_ref());
    hex::encode(hasher.finalize())
}

/// Writes submitted messages to the store, at most once per distinct content.
#[derive(Clone)]
pub struct Deduplicator {
    store: Store,
}

impl Deduplicator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Queue `content` and return its record.
    ///
    /// Submitting content that is already queued returns the queued record
    /// unchanged; it is not an error.
    pub fn submit(&self, content: impl AsRef<[u8]>) -> OutboxResult<MessageRecord> {
        self.submit_tracked(content).map(Upsert::into_record)
    }

    /// Like [`submit`](Self::submit), but reports whether the row is new.
    pub fn submit_tracked(&self, content: impl AsRef<[u8]>) -> OutboxResult<Upsert> {
        let content = content.as_ref();
        let id = fingerprint(content);
        let upsert = self.store.upsert_if_absent(&id, content, Utc::now())?;

        info!(
            id = %id,
            content_length = content.len(),
            newly_queued = upsert.is_inserted(),
            "outbox_submit"
        );

        Ok(upsert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fingerprint_known_value() {
        assert_eq!(
            fingerprint("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_fingerprint_is_byte_exact() {
        let crlf = "Subject: hi\r\n\r\nbody";
        let lf = "Subject: hi\n\nbody";
        assert_ne!(fingerprint(crlf), fingerprint(lf));
        assert_eq!(fingerprint(crlf), fingerprint(crlf));
        assert_eq!(fingerprint(crlf).len(), 64);
    }

    #[test]
    fn test_fingerprint_accepts_non_utf8() {
        let latin1: &[u8] = b"Subject: caf\xe9\r\n\r\n";
        let utf8 = "Subject: café\r\n\r\n";
        assert_ne!(fingerprint(latin1), fingerprint(utf8));
        assert_eq!(fingerprint(latin1), fingerprint(latin1.to_vec()));
    }

    #[test]
    fn test_submit_twice_keeps_one_record() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("outbox.sqlite3"), 2).unwrap();
        let dedupe = Deduplicator::new(store.clone());

        let first = dedupe.submit_tracked("Subject: hi\r\n\r\nbody").unwrap();
        let second = dedupe.submit_tracked("Subject: hi\r\n\r\nbody").unwrap();

        assert!(first.is_inserted());
        assert!(!second.is_inserted());
        assert_eq!(first.record(), second.record());
        assert_eq!(first.record().id, fingerprint("Subject: hi\r\n\r\nbody"));
        assert_eq!(store.count().unwrap(), 1);
    }
}
