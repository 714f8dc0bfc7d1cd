//! The outbox: store, deduplicator, dispatcher and queries behind one handle.
//!
//! ```text
//! send(content) → Deduplicator → Store ─┬→ Dispatcher (task) → Store.delete / Store.set_error
//!                                       └→ QueryService (read only)
//! flush() → Store.list_all() → Dispatcher (forced, one task per record)
//! ```
//!
//! Opening an `Outbox` is the only way to get a dispatcher, and `close`
//! drains it, so the lifetime of the subsystem is the lifetime of this value.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::dedupe::Deduplicator;
use crate::dispatch::{
    flush_all, AttemptHandle, AttemptOutcome, DispatchPolicy, Dispatcher, FlushCallback, FlushHandle,
};
use crate::error::OutboxResult;
use crate::query::{QueryService, RecordView};
use crate::store::{MessageRecord, Store};
use crate::transport::Transport;

/// Result of handing a message to [`Outbox::send`].
#[derive(Debug)]
pub struct SendReceipt {
    pub record: MessageRecord,
    /// False when identical content was already queued
    pub newly_queued: bool,
    /// The scheduled attempt, if one was started
    pub attempt: Option<AttemptHandle>,
}

/// A durable outbox bound to one store file and one transport.
#[derive(Clone)]
pub struct Outbox {
    store: Store,
    dedupe: Deduplicator,
    dispatcher: Dispatcher,
    query: QueryService,
}

impl Outbox {
    /// Open the store named by `config` and wire it to `transport`.
    pub fn open(config: &Config, transport: Arc<dyn Transport>) -> OutboxResult<Self> {
        let store = Store::open(&config.db_path, config.pool_size)?;
        let policy = DispatchPolicy {
            queue_only: config.queue_only,
            send_timeout: config.send_timeout(),
        };

        info!(
            db_path = %store.path(),
            queue_only = policy.queue_only,
            send_timeout_ms = policy.send_timeout.as_millis() as u64,
            transport = transport.name(),
            "outbox_opened"
        );

        Ok(Self::with_store(store, transport, policy, config.body_excerpt_chars))
    }

    /// Wire an already opened store.
    pub fn with_store(
        store: Store,
        transport: Arc<dyn Transport>,
        policy: DispatchPolicy,
        excerpt_chars: usize,
    ) -> Self {
        Self {
            dedupe: Deduplicator::new(store.clone()),
            dispatcher: Dispatcher::new(store.clone(), transport, policy),
            query: QueryService::new(store.clone(), excerpt_chars),
            store,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Persist `content` without attempting delivery.
    pub fn submit(&self, content: impl AsRef<[u8]>) -> OutboxResult<MessageRecord> {
        self.dedupe.submit(content)
    }

    /// Persist `content` and, if it was not already queued, attempt delivery.
    ///
    /// Returns once the message is durable; delivery runs in the background.
    /// Identical content that is already queued does not trigger another
    /// attempt, even when `force` is set; use [`flush`](Self::flush) to retry.
    pub fn send(&self, content: impl AsRef<[u8]>, force: bool) -> OutboxResult<SendReceipt> {
        let upsert = self.dedupe.submit_tracked(content)?;
        let newly_queued = upsert.is_inserted();
        let record = upsert.into_record();

        let attempt = if newly_queued {
            self.dispatcher.attempt(&record, force, log_outcome)
        } else {
            info!(id = %record.id, "outbox_send_already_queued");
            None
        };

        Ok(SendReceipt {
            record,
            newly_queued,
            attempt,
        })
    }

    /// Attempt delivery of every queued message.
    pub fn flush(&self) -> OutboxResult<FlushHandle> {
        self.flush_with(Arc::new(log_outcome))
    }

    /// Like [`flush`](Self::flush), with a callback for each finished attempt.
    pub fn flush_with(&self, on_result: FlushCallback) -> OutboxResult<FlushHandle> {
        flush_all(&self.store, &self.dispatcher, on_result)
    }

    pub fn list_pending(&self) -> OutboxResult<Vec<RecordView>> {
        self.query.list_pending()
    }

    pub fn count_pending(&self) -> OutboxResult<usize> {
        self.query.count_pending()
    }

    pub fn lookup(&self, ids: &HashSet<String>) -> OutboxResult<Vec<RecordView>> {
        self.query.lookup(ids)
    }

    /// Drop a queued message without delivering it.
    pub fn remove(&self, id: &str) -> OutboxResult<bool> {
        let removed = self.store.delete(id)?;
        if removed {
            warn!(id = %id, "outbox_record_removed_by_operator");
        }
        Ok(removed)
    }

    /// Wait for in-flight attempts, then release the store.
    pub async fn close(self) {
        self.dispatcher.drain().await;
        info!(db_path = %self.store.path(), "outbox_closed");
    }
}

fn log_outcome(outcome: &AttemptOutcome) {
    match outcome {
        AttemptOutcome::Delivered { id } => info!(id = %id, "outbox_message_delivered"),
        AttemptOutcome::Failed { id, error } => {
            error!(id = %id, error = %error, "outbox_message_failed")
        }
    }
}
