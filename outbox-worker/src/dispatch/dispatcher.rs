//! Single delivery attempts, run off the caller's path.
//!
//! Each attempt is its own tokio task. The transport call runs in a further
//! nested task under a timeout, so a transport that panics or hangs only
//! ever fails its own attempt. Once the transport has answered, the store is
//! reconciled first (delete on success, `last_error` on failure) and only
//! then is the caller's callback invoked.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::error::{OutboxResult, TransportError};
use crate::store::{MessageRecord, Store};
use crate::transport::{Envelope, Transport};

/// Host policy applied to unforced attempts.
#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    /// Queue everything; only forced attempts are sent.
    pub queue_only: bool,
    /// Upper bound on a single transport call.
    pub send_timeout: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            queue_only: false,
            send_timeout: Duration::from_secs(60),
        }
    }
}

/// How a delivery attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The transport accepted the message and the record was removed.
    Delivered { id: String },
    /// The transport failed; `error` was written to the record.
    Failed { id: String, error: String },
}

impl AttemptOutcome {
    pub fn id(&self) -> &str {
        match self {
            AttemptOutcome::Delivered { id } | AttemptOutcome::Failed { id, .. } => id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Delivered { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            AttemptOutcome::Delivered { .. } => None,
            AttemptOutcome::Failed { error, .. } => Some(error),
        }
    }
}

/// A scheduled attempt. Dropping the handle does not cancel it.
#[derive(Debug)]
pub struct AttemptHandle {
    id: String,
    handle: JoinHandle<AttemptOutcome>,
}

impl AttemptHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the attempt to finish.
    pub async fn wait(self) -> OutboxResult<AttemptOutcome> {
        Ok(self.handle.await?)
    }
}

/// Ids with an attempt currently running.
#[derive(Clone, Default)]
struct InFlightIds(Arc<Mutex<HashSet<String>>>);

/// Releases an id from [`InFlightIds`] when the attempt task ends.
struct InFlightGuard {
    ids: InFlightIds,
    id: String,
}

impl InFlightIds {
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `id`, or `None` if an attempt for it is already running.
    fn claim(&self, id: &str) -> Option<InFlightGuard> {
        if !self.lock().insert(id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            ids: self.clone(),
            id: id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ids.lock().remove(&self.id);
    }
}

/// Runs delivery attempts and reconciles the store with their results.
///
/// The dispatcher is the only component that mutates or deletes a record
/// after it has been created.
#[derive(Clone)]
pub struct Dispatcher {
    store: Store,
    transport: Arc<dyn Transport>,
    policy: DispatchPolicy,
    tasks: TaskTracker,
    in_flight: InFlightIds,
}

impl Dispatcher {
    pub fn new(store: Store, transport: Arc<dyn Transport>, policy: DispatchPolicy) -> Self {
        Self {
            store,
            transport,
            policy,
            tasks: TaskTracker::new(),
            in_flight: InFlightIds::default(),
        }
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Number of attempts currently running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Schedule one delivery attempt for `record` and return immediately.
    ///
    /// Returns `None` when the attempt is unforced and the policy queues
    /// everything; the record then stays queued with no error. Also returns
    /// `None`, forced or not, while another attempt for the same record is
    /// still running, so a record is never handed to the transport twice at
    /// once.
    ///
    /// `on_result` runs after the store has been updated. A panic inside it
    /// is logged and does not undo that update.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attempt<F>(&self, record: &MessageRecord, force: bool, on_result: F) -> Option<AttemptHandle>
    where
        F: FnOnce(&AttemptOutcome) + Send + 'static,
    {
        if !force && self.policy.queue_only {
            info!(id = %record.id, "dispatch_suppressed_by_policy");
            return None;
        }

        let Some(guard) = self.in_flight.claim(&record.id) else {
            info!(id = %record.id, forced = force, "dispatch_already_in_flight");
            return None;
        };

        let envelope = Envelope::from_record(record);
        let id = envelope.id.clone();
        let store = self.store.clone();
        let transport = Arc::clone(&self.transport);
        let send_timeout = self.policy.send_timeout;

        info!(
            id = %id,
            forced = force,
            transport = transport.name(),
            recipient_count = envelope.recipients.len(),
            "dispatch_attempt_scheduled"
        );

        let handle = self.tasks.spawn(async move {
            let _guard = guard;
            let id = envelope.id.clone();

            let outcome = match deliver(transport, envelope, send_timeout).await {
                Ok(()) => AttemptOutcome::Delivered { id },
                Err(error) => AttemptOutcome::Failed { id, error },
            };

            if let Err(e) = reconcile(store, outcome.clone()).await {
                error!(id = %outcome.id(), error = %e, "dispatch_reconcile_failed");
            }

            if catch_unwind(AssertUnwindSafe(|| on_result(&outcome))).is_err() {
                error!(id = %outcome.id(), "dispatch_callback_panicked");
            }

            outcome
        });

        Some(AttemptHandle { id, handle })
    }

    /// Wait until every scheduled attempt has finished.
    ///
    /// Attempts scheduled while draining are waited for as well.
    pub async fn drain(&self) {
        let pending = self.tasks.len();
        if pending > 0 {
            info!(in_flight = pending, "dispatch_draining");
        }
        // A closed tracker still accepts tasks; closing only lets wait() finish.
        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// Run the transport in its own task, bounded by `send_timeout`.
async fn deliver(
    transport: Arc<dyn Transport>,
    envelope: Envelope,
    send_timeout: Duration,
) -> Result<(), String> {
    let id = envelope.id.clone();
    let mut send = tokio::spawn(async move { transport.send(&envelope).await });

    let result = match timeout(send_timeout, &mut send).await {
        Ok(Ok(result)) => result.map_err(|e| e.to_string()),
        Ok(Err(join_error)) => Err(format!("Delivery task aborted: {}", join_error)),
        Err(_) => {
            send.abort();
            Err(TransportError::Timeout(send_timeout).to_string())
        }
    };

    match &result {
        Ok(()) => info!(id = %id, "dispatch_attempt_delivered"),
        Err(e) => warn!(id = %id, error = %e, "dispatch_attempt_failed"),
    }

    result
}

/// Apply an outcome to the store: delete on success, record the error otherwise.
async fn reconcile(store: Store, outcome: AttemptOutcome) -> OutboxResult<()> {
    tokio::task::spawn_blocking(move || match outcome {
        AttemptOutcome::Delivered { id } => store.delete(&id).map(|_| ()),
        AttemptOutcome::Failed { id, error } => store.set_error(&id, &error).map(|_| ()),
    })
    .await?
}
