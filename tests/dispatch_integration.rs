//! End-to-end processing round tests
//!
//! These tests drive the dispatcher, purger and stats reporter through the
//! public API over the in-memory store, with scripted transports standing in
//! for a real mail server.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use uuid::Uuid;

use mail_queue::codec::MessageCodec;
use mail_queue::config::Settings;
use mail_queue::dispatch::{Dispatcher, DispatcherConfig};
use mail_queue::mail::MailMessage;
use mail_queue::queue::{MemoryQueueStore, NewQueueItem, QueueItem, QueueStore, StoreError};
use mail_queue::transport::{Transport, TransportError};
use mail_queue::MailQueue;

// ============================================================================
// Test doubles
// ============================================================================

#[derive(Debug, Clone)]
enum Step {
    Accept,
    Decline,
    Fail(&'static str),
    Hang,
}

/// Replays a fixed script of outcomes, then accepts everything.
#[derive(Default)]
struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    sends: Mutex<Vec<MailMessage>>,
}

impl ScriptedTransport {
    fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            sends: Mutex::new(Vec::new()),
        }
    }

    fn sent_subjects(&self) -> Vec<String> {
        self.sends.lock().unwrap().iter().map(|m| m.subject.clone()).collect()
    }

    fn sent_to(&self) -> Vec<String> {
        self.sends
            .lock()
            .unwrap()
            .iter()
            .flat_map(|m| m.to.iter().map(|mb| mb.address.clone()))
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn send(&self, message: &MailMessage) -> Result<bool, TransportError> {
        self.sends.lock().unwrap().push(message.clone());
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Accept);

        // Let overlapping rounds interleave
        tokio::task::yield_now().await;

        match step {
            Step::Accept => Ok(true),
            Step::Decline => Ok(false),
            Step::Fail(reason) => Err(TransportError::Connection(reason.to_string())),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(true)
            }
        }
    }
}

/// Memory store whose outcome writes fail for one item.
struct FlakyStore {
    inner: MemoryQueueStore,
    failing: Mutex<Option<Uuid>>,
    outcome_writes: AtomicUsize,
}

#[async_trait]
impl QueueStore for FlakyStore {
    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    async fn schema_present(&self) -> Result<bool, StoreError> {
        self.inner.schema_present().await
    }

    async fn insert(&self, item: NewQueueItem) -> Result<QueueItem, StoreError> {
        self.inner.insert(item).await
    }

    async fn select_batch(
        &self,
        limit: usize,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, StoreError> {
        self.inner.select_batch(limit, max_attempts, now).await
    }

    async fn claim(&self, id: Uuid, observed: u32, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.inner.claim(id, observed, now).await
    }

    async fn record_outcome(
        &self,
        id: Uuid,
        attempts: u32,
        last_attempt_time: DateTime<Utc>,
        sent_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.outcome_writes.fetch_add(1, Ordering::SeqCst);
        if *self.failing.lock().unwrap() == Some(id) {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner
            .record_outcome(id, attempts, last_attempt_time, sent_time)
            .await
    }

    async fn purge_resolved(&self, max_attempts: u32) -> Result<u64, StoreError> {
        self.inner.purge_resolved(max_attempts).await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.inner.count().await
    }

    async fn count_with_attempts(&self) -> Result<u64, StoreError> {
        self.inner.count_with_attempts().await
    }

    async fn pending_page(&self, offset: u64, limit: usize) -> Result<Vec<QueueItem>, StoreError> {
        self.inner.pending_page(offset, limit).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueueItem>, StoreError> {
        self.inner.get(id).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn message(subject: &str) -> MailMessage {
    MailMessage::builder("noreply@example.com")
        .to("alice@example.com")
        .subject(subject)
        .text_body("Hello")
        .build()
}

async fn enqueue_at(store: &dyn QueueStore, subject: &str, created_at: DateTime<Utc>) -> QueueItem {
    let payload = MessageCodec::new().encode(&message(subject)).unwrap();
    store
        .insert(
            NewQueueItem::new(subject, payload)
                .created_at(created_at)
                .send_at(created_at),
        )
        .await
        .unwrap()
}

fn no_purge() -> DispatcherConfig {
    DispatcherConfig {
        auto_purge: false,
        ..Default::default()
    }
}

// ============================================================================
// Round behavior
// ============================================================================

#[tokio::test]
async fn test_single_item_sent() {
    let store = Arc::new(MemoryQueueStore::new());
    let now = Utc::now();
    let item = enqueue_at(store.as_ref(), "one", now - ChronoDuration::seconds(5)).await;
    let dispatcher = Dispatcher::new(store.clone(), Arc::new(ScriptedTransport::default()), no_purge());

    let report = dispatcher.process(10, 3, now).await.unwrap();

    assert_eq!(report.items_processed, 1);
    assert_eq!(report.sent, 1);
    assert_eq!(report.not_sent, 0);
    let stored = store.get(item.id).await.unwrap().unwrap();
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.sent_time, Some(now));
}

#[tokio::test]
async fn test_corrupt_item_is_isolated() {
    let store = Arc::new(MemoryQueueStore::new());
    let now = Utc::now();
    let t0 = now - ChronoDuration::minutes(3);
    let first = enqueue_at(store.as_ref(), "first", t0).await;
    let second = enqueue_at(store.as_ref(), "second", t0 + ChronoDuration::minutes(1)).await;
    let third = enqueue_at(store.as_ref(), "third", t0 + ChronoDuration::minutes(2)).await;
    assert!(store.replace_payload(second.id, b"\x00\x01garbage".to_vec()));

    let transport = Arc::new(ScriptedTransport::default());
    let dispatcher = Dispatcher::new(store.clone(), transport.clone(), no_purge());
    let report = dispatcher.process(10, 3, now).await.unwrap();

    assert_eq!(report.items_processed, 3);
    assert_eq!(report.sent, 2);
    assert_eq!(report.decode_failures, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(transport.sent_subjects(), vec!["first", "third"]);

    for id in [first.id, third.id] {
        assert!(store.get(id).await.unwrap().unwrap().is_sent());
    }
    let corrupt = store.get(second.id).await.unwrap().unwrap();
    assert_eq!(corrupt.attempts, 1);
    assert!(corrupt.sent_time.is_none());
    assert_eq!(corrupt.last_attempt_time, Some(now));
}

#[tokio::test]
async fn test_totals_balance_across_outcomes() {
    let store = Arc::new(MemoryQueueStore::new());
    let now = Utc::now();
    let t0 = now - ChronoDuration::minutes(10);
    for i in 0..5 {
        enqueue_at(store.as_ref(), &format!("mail {i}"), t0 + ChronoDuration::minutes(i)).await;
    }
    let corrupt = enqueue_at(store.as_ref(), "corrupt", t0 + ChronoDuration::minutes(6)).await;
    store.replace_payload(corrupt.id, Vec::new());

    let transport = Arc::new(ScriptedTransport::new([
        Step::Accept,
        Step::Decline,
        Step::Fail("connection refused"),
        Step::Fail("connection refused"),
        Step::Accept,
    ]));
    let dispatcher = Dispatcher::new(store.clone(), transport, no_purge());
    let report = dispatcher.process(10, 3, now).await.unwrap();

    assert_eq!(report.items_processed, 6);
    assert_eq!(report.sent, 2);
    assert_eq!(report.not_sent, 1);
    assert_eq!(report.other_failures, 2);
    assert_eq!(report.decode_failures, 1);
    assert!(report.is_balanced());
    // Same transport error text is kept once
    assert_eq!(report.errors.len(), 2);
}

#[tokio::test]
async fn test_attempts_increase_by_one_per_round() {
    let store = Arc::new(MemoryQueueStore::new());
    let now = Utc::now();
    let item = enqueue_at(store.as_ref(), "retry", now - ChronoDuration::minutes(1)).await;
    let transport = Arc::new(ScriptedTransport::new([Step::Decline, Step::Decline]));
    let dispatcher = Dispatcher::new(store.clone(), transport, no_purge());

    for expected in 1..=2u32 {
        let before = store.get(item.id).await.unwrap().unwrap().attempts;
        dispatcher.process(10, 3, now).await.unwrap();
        let after = store.get(item.id).await.unwrap().unwrap().attempts;
        assert_eq!(after, before + 1);
        assert_eq!(after, expected);
    }
}

#[tokio::test]
async fn test_sent_item_not_selected_again() {
    let store = Arc::new(MemoryQueueStore::new());
    let now = Utc::now();
    enqueue_at(store.as_ref(), "once", now - ChronoDuration::minutes(1)).await;
    let transport = Arc::new(ScriptedTransport::default());
    let dispatcher = Dispatcher::new(store.clone(), transport.clone(), no_purge());

    assert_eq!(dispatcher.process(10, 3, now).await.unwrap().sent, 1);
    let report = dispatcher.process(10, 3, now + ChronoDuration::minutes(1)).await.unwrap();

    assert_eq!(report.items_processed, 0);
    assert_eq!(transport.sent_subjects().len(), 1);
}

#[tokio::test]
async fn test_exhausted_item_is_never_selected_and_purgeable() {
    let store = Arc::new(MemoryQueueStore::new());
    let now = Utc::now();
    let item = enqueue_at(store.as_ref(), "doomed", now - ChronoDuration::minutes(1)).await;
    let transport = Arc::new(ScriptedTransport::new([
        Step::Fail("mailbox unavailable"),
        Step::Fail("mailbox unavailable"),
    ]));
    let dispatcher = Dispatcher::new(store.clone(), transport, no_purge());

    dispatcher.process(10, 2, now).await.unwrap();
    dispatcher.process(10, 2, now).await.unwrap();
    assert_eq!(store.get(item.id).await.unwrap().unwrap().attempts, 2);

    let report = dispatcher.process(10, 2, now).await.unwrap();
    assert_eq!(report.items_processed, 0);

    assert_eq!(store.purge_resolved(2).await.unwrap(), 1);
    assert_eq!(store.purge_resolved(2).await.unwrap(), 0);
}

#[tokio::test]
async fn test_future_item_is_not_processed() {
    let store = Arc::new(MemoryQueueStore::new());
    let now = Utc::now();
    let payload = MessageCodec::new().encode(&message("later")).unwrap();
    store
        .insert(NewQueueItem::new("later", payload).send_at(now + ChronoDuration::hours(1)))
        .await
        .unwrap();

    let dispatcher = Dispatcher::new(store, Arc::new(ScriptedTransport::default()), no_purge());
    let report = dispatcher.process(10, 3, now).await.unwrap();

    assert_eq!(report.items_processed, 0);
}

#[tokio::test]
async fn test_limit_truncates_batch_in_age_order() {
    let store = Arc::new(MemoryQueueStore::new());
    let now = Utc::now();
    let t0 = now - ChronoDuration::minutes(10);
    enqueue_at(store.as_ref(), "oldest", t0).await;
    enqueue_at(store.as_ref(), "middle", t0 + ChronoDuration::minutes(1)).await;
    enqueue_at(store.as_ref(), "newest", t0 + ChronoDuration::minutes(2)).await;

    let transport = Arc::new(ScriptedTransport::default());
    let dispatcher = Dispatcher::new(store, transport.clone(), no_purge());
    let report = dispatcher.process(2, 3, now).await.unwrap();

    assert_eq!(report.items_processed, 2);
    assert_eq!(transport.sent_subjects(), vec!["oldest", "middle"]);
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_hanging_transport_times_out() {
    let store = Arc::new(MemoryQueueStore::new());
    let now = Utc::now();
    let hung = enqueue_at(store.as_ref(), "hung", now - ChronoDuration::minutes(2)).await;
    enqueue_at(store.as_ref(), "after", now - ChronoDuration::minutes(1)).await;

    let config = DispatcherConfig {
        send_timeout: Duration::from_secs(5),
        auto_purge: false,
        ..Default::default()
    };
    let transport = Arc::new(ScriptedTransport::new([Step::Hang]));
    let dispatcher = Dispatcher::new(store.clone(), transport, config);

    let report = dispatcher.process(10, 3, now).await.unwrap();

    assert_eq!(report.other_failures, 1);
    assert_eq!(report.sent, 1);
    assert!(report.errors.iter().any(|e| e.contains("timed out")));
    let stored = store.get(hung.id).await.unwrap().unwrap();
    assert_eq!(stored.attempts, 1);
    assert!(stored.sent_time.is_none());
}

#[tokio::test]
async fn test_store_failure_does_not_abort_round() {
    let store = Arc::new(FlakyStore {
        inner: MemoryQueueStore::new(),
        failing: Mutex::new(None),
        outcome_writes: AtomicUsize::new(0),
    });
    let now = Utc::now();
    let first = enqueue_at(store.as_ref(), "first", now - ChronoDuration::minutes(2)).await;
    let second = enqueue_at(store.as_ref(), "second", now - ChronoDuration::minutes(1)).await;
    *store.failing.lock().unwrap() = Some(first.id);

    let dispatcher = Dispatcher::new(store.clone(), Arc::new(ScriptedTransport::default()), no_purge());
    let report = dispatcher.process(10, 3, now).await.unwrap();

    assert_eq!(report.items_processed, 2);
    assert_eq!(report.sent, 2);
    assert_eq!(report.store_failures, 1);
    assert!(report.errors.iter().any(|e| e.contains("connection reset")));
    assert_eq!(store.outcome_writes.load(Ordering::SeqCst), 2);

    // The claim already recorded the attempt for the failed write
    let first = store.get(first.id).await.unwrap().unwrap();
    assert_eq!(first.attempts, 1);
    assert!(first.sent_time.is_none());
    assert!(store.get(second.id).await.unwrap().unwrap().is_sent());
}

#[tokio::test]
async fn test_missing_schema_is_fatal() {
    let mut settings = Settings::default();
    settings.mailqueue.table = "outbox".to_string();
    let queue = MailQueue::new(
        Arc::new(MemoryQueueStore::without_schema()),
        Arc::new(ScriptedTransport::default()),
        &settings,
    );

    let err = queue.process().await.unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("\"outbox\" not found in database"));
    assert!(queue.stat().await.unwrap_err().is_config());
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_in_flight_item_is_not_selected_by_another_round() {
    let store = Arc::new(MemoryQueueStore::new());
    let now = Utc::now();
    let item = enqueue_at(store.as_ref(), "in flight", now - ChronoDuration::minutes(1)).await;

    // Another round claimed the item and has not recorded an outcome yet
    assert!(store.claim(item.id, 0, now).await.unwrap());

    let transport = Arc::new(ScriptedTransport::default());
    let dispatcher = Dispatcher::new(store.clone(), transport.clone(), no_purge());
    let report = dispatcher.process(10, 3, now).await.unwrap();

    assert_eq!(report.items_processed, 0);
    assert!(transport.sent_subjects().is_empty());
}

#[tokio::test]
async fn test_overlapping_rounds_never_double_send() {
    let store = Arc::new(MemoryQueueStore::new());
    let now = Utc::now();
    let t0 = now - ChronoDuration::minutes(30);
    for i in 0..20 {
        enqueue_at(store.as_ref(), &format!("mail {i}"), t0 + ChronoDuration::minutes(i)).await;
    }

    let transport = Arc::new(ScriptedTransport::default());
    let first = Dispatcher::new(store.clone(), transport.clone(), no_purge());
    let second = Dispatcher::new(store.clone(), transport.clone(), no_purge());

    let (a, b) = futures::join!(first.process(20, 3, now), second.process(20, 3, now));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.sent + b.sent, 20);
    assert_eq!(a.items_processed + b.items_processed, 20);
    assert_eq!(a.other_failures + b.other_failures, 0);

    let mut counts: HashMap<String, usize> = HashMap::new();
    for subject in transport.sent_subjects() {
        *counts.entry(subject).or_default() += 1;
    }
    assert_eq!(counts.len(), 20);
    assert!(counts.values().all(|&n| n == 1));

    assert!(store.pending_page(0, 100).await.unwrap().is_empty());
}

// ============================================================================
// Facade
// ============================================================================

#[tokio::test]
async fn test_dev_override_only_in_development() {
    for (run_mode, expected) in [
        ("development", "dev@example.com"),
        ("production", "alice@example.com"),
    ] {
        let mut settings = Settings::default();
        settings.run_mode = run_mode.to_string();
        settings.mailqueue.dev_override_recipient = Some("dev@example.com".to_string());

        let transport = Arc::new(ScriptedTransport::default());
        let queue = MailQueue::new(Arc::new(MemoryQueueStore::new()), transport.clone(), &settings);
        queue.enqueue(&message("override"), None).await.unwrap();
        queue.process().await.unwrap();

        assert_eq!(transport.sent_to(), vec![expected.to_string()], "run mode {run_mode}");
    }
}

#[tokio::test]
async fn test_stat_tolerates_corrupt_items_without_writing() {
    let store = Arc::new(MemoryQueueStore::new());
    let queue = MailQueue::new(store.clone(), Arc::new(ScriptedTransport::default()), &Settings::default());

    let good = queue.enqueue(&message("good"), None).await.unwrap();
    let bad = queue.enqueue(&message("bad"), None).await.unwrap();
    store.replace_payload(bad.id, b"{\"format\":\"mail-queue/message\",\"version\":9,\"message\":{}}".to_vec());

    let report = queue.stat().await.unwrap();

    assert_eq!(report.total_items, 2);
    assert_eq!(report.pending_checked, 2);
    assert_eq!(report.decode_failures, 1);
    assert_eq!(report.other_failures, 0);
    for id in [good.id, bad.id] {
        assert_eq!(store.get(id).await.unwrap().unwrap().attempts, 0);
    }
}

#[tokio::test]
async fn test_round_then_purge_cycle() {
    let store = Arc::new(MemoryQueueStore::new());
    let transport = Arc::new(ScriptedTransport::new([Step::Accept, Step::Decline]));
    let mut settings = Settings::default();
    settings.mailqueue.auto_purge = false;
    let queue = MailQueue::new(store.clone(), transport, &settings);

    queue.enqueue(&message("delivered"), None).await.unwrap();
    queue.enqueue(&message("declined"), None).await.unwrap();

    let report = queue.process().await.unwrap();
    assert_eq!((report.sent, report.not_sent, report.purged), (1, 1, 0));

    assert_eq!(queue.purge().await.unwrap(), 1);
    assert_eq!(queue.purge().await.unwrap(), 0);
    assert_eq!(store.count().await.unwrap(), 1);
}
