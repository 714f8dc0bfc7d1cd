//! End-to-end behaviour of the outbox through its public API.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::{tempdir, TempDir};

use outbox::{
    fingerprint, Config, Dispatcher, Envelope, Outbox, Store, Transport, TransportError,
};

/// Transport that fails for content containing `poison`, if set.
struct StubTransport {
    poison: Option<&'static str>,
    calls: Arc<AtomicUsize>,
}

impl StubTransport {
    fn ok() -> (Arc<Self>, Arc<AtomicUsize>) {
        Self::build(None)
    }

    fn failing_on(marker: &'static str) -> (Arc<Self>, Arc<AtomicUsize>) {
        Self::build(Some(marker))
    }

    fn build(poison: Option<&'static str>) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let transport = Arc::new(Self {
            poison,
            calls: Arc::clone(&calls),
        });
        (transport, calls)
    }
}

#[async_trait]
impl Transport for StubTransport {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.poison {
            Some(marker) if contains(&envelope.content, marker) => Err(TransportError::Rejected {
                status: 554,
                body: "E: relay denied".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

fn contains(content: &[u8], marker: &str) -> bool {
    content
        .windows(marker.len())
        .any(|window| window == marker.as_bytes())
}

fn message(n: usize) -> String {
    format!(
        "From: app@example.com\r\nTo: user{n}@example.com\r\nSubject: Message {n}\r\n\r\nBody {n}"
    )
}

fn open(transport: Arc<dyn Transport>, queue_only: bool) -> (TempDir, Outbox) {
    let dir = tempdir().unwrap();
    let config = Config {
        db_path: dir.path().join("outbox.sqlite3"),
        queue_only,
        ..Config::default()
    };
    let outbox = Outbox::open(&config, transport).unwrap();
    (dir, outbox)
}

#[tokio::test]
async fn submitting_twice_keeps_one_record() {
    let (transport, _) = StubTransport::ok();
    let (_dir, outbox) = open(transport, true);
    let content = message(1);

    let first = outbox.submit(&content).unwrap();
    let second = outbox.submit(&content).unwrap();

    assert_eq!(first.id, fingerprint(&content));
    assert_eq!(second.id, first.id);
    assert_eq!(second.created_at, first.created_at);
    assert_eq!(outbox.count_pending().unwrap(), 1);
}

#[tokio::test]
async fn successful_attempt_removes_record() {
    let (transport, _) = StubTransport::ok();
    let (_dir, outbox) = open(transport, true);
    let record = outbox.submit(&message(1)).unwrap();

    let outcome = outbox
        .dispatcher()
        .attempt(&record, true, |_| {})
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert!(outcome.is_success());
    let remaining = outbox.store().list_all().unwrap();
    assert!(remaining.iter().all(|r| r.id != record.id));
}

#[tokio::test]
async fn failed_attempt_keeps_record_with_reason() {
    let (transport, _) = StubTransport::failing_on("Body");
    let (_dir, outbox) = open(transport, true);
    let record = outbox.submit(&message(1)).unwrap();

    outbox
        .dispatcher()
        .attempt(&record, true, |_| {})
        .unwrap()
        .wait()
        .await
        .unwrap();

    let ids: HashSet<String> = [record.id.clone()].into_iter().collect();
    let views = outbox.lookup(&ids).unwrap();
    assert_eq!(views.len(), 1);
    assert!(views[0].last_error.as_deref().unwrap().contains("E: relay denied"));
}

#[tokio::test]
async fn listing_follows_creation_time() {
    let (transport, _) = StubTransport::ok();
    let (_dir, outbox) = open(transport, true);
    let store = outbox.store();
    let t = |minute| Utc.with_ymd_and_hms(2024, 5, 1, 9, minute, 0).unwrap();

    store.upsert_if_absent("third", &message(3), t(3)).unwrap();
    store.upsert_if_absent("first", &message(1), t(1)).unwrap();
    store.upsert_if_absent("second", &message(2), t(2)).unwrap();
    store.set_error("first", "deferred").unwrap();

    let order: Vec<String> = outbox.list_pending().unwrap().into_iter().map(|v| v.id).collect();

    assert_eq!(order, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn flush_isolates_a_failing_record() {
    let (transport, calls) = StubTransport::failing_on("Body 2");
    let (_dir, outbox) = open(transport, true);
    let records: Vec<_> = (1..=3).map(|n| outbox.submit(&message(n)).unwrap()).collect();

    let report = outbox.flush().unwrap().wait().await;

    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(outbox.count_pending().unwrap(), 1);
    assert_eq!(outbox.list_pending().unwrap()[0].id, records[1].id);
}

#[tokio::test]
async fn resubmitting_failed_content_does_not_retry() {
    let (transport, calls) = StubTransport::failing_on("Body");
    let (_dir, outbox) = open(transport, false);
    let content = message(1);

    let first = outbox.send(&content, false).unwrap();
    first.attempt.unwrap().wait().await.unwrap();
    assert_eq!(outbox.count_pending().unwrap(), 1);

    let second = outbox.send(&content, false).unwrap();
    outbox.dispatcher().drain().await;

    assert!(second.attempt.is_none());
    assert_eq!(outbox.count_pending().unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn flush_recovers_records_written_before_a_crash() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("outbox.sqlite3");

    {
        let store = Store::open(&path, 2).unwrap();
        for n in 0..5 {
            store
                .upsert_if_absent(&format!("orphan-{n}"), &message(n), Utc::now())
                .unwrap();
        }
    }

    let (transport, calls) = StubTransport::ok();
    let config = Config {
        db_path: path,
        ..Config::default()
    };
    let outbox = Outbox::open(&config, transport).unwrap();

    let report = outbox.flush().unwrap().wait().await;

    assert_eq!(report.delivered, 5);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(outbox.count_pending().unwrap(), 0);
    outbox.close().await;
}

#[tokio::test]
async fn dispatcher_over_shared_store_sees_submissions() {
    let (transport, _) = StubTransport::ok();
    let (_dir, outbox) = open(transport.clone(), true);
    let other = Dispatcher::new(outbox.store().clone(), transport, Default::default());
    let record = outbox.submit(&message(7)).unwrap();

    other.attempt(&record, false, |_| {}).unwrap().wait().await.unwrap();

    assert_eq!(outbox.count_pending().unwrap(), 0);
}

#[tokio::test]
async fn non_utf8_content_is_stored_and_delivered_verbatim() {
    let (transport, calls) = StubTransport::ok();
    let (_dir, outbox) = open(transport, true);
    let content: &[u8] = b"From: app@example.com\r\nTo: rene@example.com\r\nSubject: Caf\xe9\r\n\r\nD\xe9j\xe0 vu";

    let record = outbox.submit(content).unwrap();
    assert_eq!(record.id, fingerprint(content));
    assert_eq!(outbox.store().list_all().unwrap()[0].content, content);

    let report = outbox.flush().unwrap().wait().await;

    assert_eq!(report.delivered, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(outbox.count_pending().unwrap(), 0);
}
