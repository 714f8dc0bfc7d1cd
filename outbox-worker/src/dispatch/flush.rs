//! Bulk resubmission of every queued record.
//!
//! Used on startup to recover messages left behind by a crash, and on
//! demand when an operator asks for a retry.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{error, info};

use super::dispatcher::{AttemptHandle, AttemptOutcome, Dispatcher};
use crate::error::OutboxResult;
use crate::store::Store;

/// Callback shared by every attempt in a flush.
pub type FlushCallback = Arc<dyn Fn(&AttemptOutcome) + Send + Sync>;

/// Attempts scheduled by one flush.
#[derive(Debug)]
pub struct FlushHandle {
    attempts: Vec<AttemptHandle>,
}

/// Tally of a finished flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub failed: usize,
    /// Attempts whose task died before reporting
    pub aborted: usize,
}

impl FlushHandle {
    /// Number of attempts scheduled.
    pub fn scheduled(&self) -> usize {
        self.attempts.len()
    }

    /// Ids in the order they were scheduled.
    pub fn ids(&self) -> Vec<String> {
        self.attempts.iter().map(|a| a.id().to_string()).collect()
    }

    /// Wait for every attempt to finish.
    pub async fn wait(self) -> FlushReport {
        let results = join_all(self.attempts.into_iter().map(AttemptHandle::wait)).await;

        let mut report = FlushReport::default();
        for result in results {
            match result {
                Ok(outcome) if outcome.is_success() => report.delivered += 1,
                Ok(_) => report.failed += 1,
                Err(e) => {
                    error!(error = %e, "flush_attempt_aborted");
                    report.aborted += 1;
                }
            }
        }

        info!(
            delivered = report.delivered,
            failed = report.failed,
            aborted = report.aborted,
            "flush_complete"
        );

        report
    }
}

/// Schedule a forced attempt for every record currently queued.
///
/// The record list is read once; records queued after that are not part of
/// this flush. Records that already have an attempt running are skipped.
/// Returns as soon as all attempts are scheduled.
pub fn flush_all(
    store: &Store,
    dispatcher: &Dispatcher,
    on_result: FlushCallback,
) -> OutboxResult<FlushHandle> {
    let records = store.list_all()?;

    info!(record_count = records.len(), "flush_start");

    let attempts: Vec<AttemptHandle> = records
        .iter()
        .filter_map(|record| {
            let on_result = Arc::clone(&on_result);
            dispatcher.attempt(record, true, move |outcome| on_result(outcome))
        })
        .collect();

    if attempts.len() < records.len() {
        info!(
            skipped = records.len() - attempts.len(),
            "flush_skipped_in_flight_records"
        );
    }

    Ok(FlushHandle { attempts })
}
