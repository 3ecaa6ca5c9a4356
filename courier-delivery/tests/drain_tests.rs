#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use courier_delivery::{
    Acquire, ComposeError, DeliveryEngine, DeliveryError, DrainLock, FileLock, LockWait,
    MemoryLock, MemoryTransport, SendError, TransportFailure, make_message, retry,
    retry_deferred,
};
use courier_store::{
    DeliveryResult, FileStore, MemoryStore, Message, MessageStore, Payload, Priority,
    SuppressionList, TransportParams,
};
use pretty_assertions::assert_eq;

fn at(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::seconds(offset_secs)
}

fn message(subject: &str, priority: Priority, offset_secs: i64) -> Message {
    Message::new(
        Payload {
            from: Some("app@example.com".to_string()),
            to: vec![format!("{}@example.com", subject.to_lowercase())],
            subject: subject.to_string(),
            body: format!("body of {subject}"),
            ..Default::default()
        },
        None,
        priority,
    )
    .with_enqueued_at(at(offset_secs))
}

struct Harness {
    store: MemoryStore,
    transport: MemoryTransport,
    lock: MemoryLock,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            transport: MemoryTransport::new(),
            lock: MemoryLock::new(),
        }
    }

    fn engine(&self) -> DeliveryEngine {
        DeliveryEngine::new(
            Arc::new(self.store.clone()),
            Arc::new(self.transport.clone()),
            Arc::new(self.lock.clone()),
            LockWait::NonBlocking,
        )
    }

    async fn enqueue(&self, message: &Message) {
        self.store.insert(message).await.unwrap();
    }
}

#[tokio::test]
async fn test_end_to_end_priority_then_age() {
    let h = Harness::new();
    h.enqueue(&message("A", Priority::High, 1)).await;
    h.enqueue(&message("B", Priority::High, 0)).await;
    h.enqueue(&message("C", Priority::Low, 0)).await;

    let report = h.engine().drain_once().await.unwrap();

    assert_eq!((report.sent, report.deferred), (3, 0));
    assert_eq!(h.transport.sent_subjects(), vec!["B", "A", "C"]);
    assert_eq!(h.store.count().await.unwrap(), 0);

    let log = h.store.log_entries().await.unwrap();
    assert_eq!(log.len(), 3);
    assert!(log.iter().all(|entry| entry.result == DeliveryResult::Success));
    assert_eq!(
        log.iter().map(|e| e.payload.subject.as_str()).collect::<Vec<_>>(),
        vec!["B", "A", "C"]
    );
}

#[tokio::test]
async fn test_end_to_end_recipient_refused() {
    let h = Harness::new();
    let d = message("D", Priority::Medium, 0);
    h.enqueue(&d).await;
    h.transport.refuse(
        "d@example.com",
        TransportFailure::RecipientsRefused("550 5.1.1 mailbox unavailable".to_string()),
    );

    let report = h.engine().drain_once().await.unwrap();

    assert_eq!((report.sent, report.deferred), (0, 1));
    let stored = h.store.get(&d.id).await.unwrap().expect("D is kept");
    assert_eq!(stored.priority, Priority::Deferred);

    let log = h.store.log_entries().await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].result, DeliveryResult::Failure);
    assert_eq!(log[0].message_id, d.id);
    assert_eq!(log[0].priority, Priority::Medium);
    assert!(log[0].detail.contains("550"));
}

#[tokio::test]
async fn test_deferred_never_attempted() {
    let h = Harness::new();
    let deferred = message("Deferred", Priority::Deferred, -60);
    h.enqueue(&deferred).await;
    h.enqueue(&message("Low", Priority::Low, 5)).await;
    h.enqueue(&message("Medium", Priority::Medium, 10)).await;

    let report = h.engine().drain_once().await.unwrap();

    assert_eq!(report.sent, 2);
    assert_eq!(h.transport.sent_subjects(), vec!["Medium", "Low"]);
    assert_eq!(
        h.store.messages().await.unwrap().into_iter().map(|m| m.id).collect::<Vec<_>>(),
        vec![deferred.id]
    );

    // The deferred message alone does not count as work
    let again = h.engine().drain_once().await.unwrap();
    assert!(again.found_empty());
}

#[tokio::test]
async fn test_contended_pass_does_nothing() {
    let h = Harness::new();
    h.enqueue(&message("A", Priority::High, 0)).await;

    let Acquire::Granted(held) = h.lock.acquire(LockWait::NonBlocking).await.unwrap() else {
        panic!("Expected the lock");
    };

    let report = h.engine().drain_once().await.unwrap();
    assert!(report.contended);
    assert_eq!((report.sent, report.deferred), (0, 0));
    assert!(h.transport.sent().is_empty());
    assert_eq!(h.store.count().await.unwrap(), 1);

    held.release();
    let report = h.engine().drain_once().await.unwrap();
    assert_eq!(report.sent, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_passes_never_send_twice() {
    let h = Harness::new();
    for i in 0..20 {
        h.enqueue(&message(&format!("M{i}"), Priority::Medium, i)).await;
    }

    let engines: Vec<_> = (0..4).map(|_| h.engine()).collect();
    let handles: Vec<_> = engines
        .into_iter()
        .map(|engine| tokio::spawn(async move { engine.drain_once().await }))
        .collect();

    let mut total_sent = 0;
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        if report.contended {
            assert_eq!((report.sent, report.deferred), (0, 0));
        }
        total_sent += report.sent;
    }

    assert_eq!(total_sent, 20);
    assert_eq!(h.transport.sent().len(), 20);
    assert_eq!(h.store.log_entries().await.unwrap().len(), 20);
}

#[tokio::test]
async fn test_defer_and_retry_round_trip() {
    let h = Harness::new();
    let m = message("Flaky", Priority::High, 0);
    h.enqueue(&m).await;
    h.transport
        .fail_next_send(TransportFailure::Socket("connection reset".to_string()));

    let first = h.engine().drain_once().await.unwrap();
    assert_eq!((first.sent, first.deferred), (0, 1));

    // Nothing to do until someone retries it
    assert!(h.engine().drain_once().await.unwrap().found_empty());

    assert!(retry(&h.store, &m.id, Priority::default()).await.unwrap());
    assert_eq!(
        h.store.get(&m.id).await.unwrap().map(|m| m.priority),
        Some(Priority::Medium)
    );

    let second = h.engine().drain_once().await.unwrap();
    assert_eq!((second.sent, second.deferred), (1, 0));

    let results: Vec<_> = h
        .store
        .log_entries()
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.result)
        .collect();
    assert_eq!(results, vec![DeliveryResult::Failure, DeliveryResult::Success]);
}

#[tokio::test]
async fn test_bulk_retry() {
    let h = Harness::new();
    for (i, name) in ["X", "Y", "Z"].into_iter().enumerate() {
        h.enqueue(&message(name, Priority::Low, i64::try_from(i).unwrap())).await;
        h.transport.refuse(
            &format!("{}@example.com", name.to_lowercase()),
            TransportFailure::RecipientsRefused("451 try later".to_string()),
        );
    }

    assert_eq!(h.engine().drain_once().await.unwrap().deferred, 3);
    assert_eq!(retry_deferred(&h.store, Priority::High).await.unwrap(), 3);
    assert!(
        h.store
            .messages()
            .await
            .unwrap()
            .iter()
            .all(|m| m.priority == Priority::High)
    );
}

#[tokio::test]
async fn test_suppression_filtering_and_no_dedup() {
    let h = Harness::new();
    h.store.suppress("bounced@example.com").await.unwrap();

    let payload = Payload {
        from: Some("app@example.com".to_string()),
        to: vec![
            "Bounced@Example.com".to_string(),
            "reader@example.com".to_string(),
        ],
        subject: "Newsletter".to_string(),
        ..Default::default()
    };

    for _ in 0..2 {
        let m = make_message(&h.store, payload.clone(), None, Priority::Low)
            .await
            .unwrap();
        assert_eq!(m.payload.to, vec!["reader@example.com"]);
        h.enqueue(&m).await;
    }

    assert_eq!(h.store.count().await.unwrap(), 2);

    let report = h.engine().drain_once().await.unwrap();
    assert_eq!(report.sent, 2);
    assert!(
        h.transport
            .sent()
            .iter()
            .all(|p| p.recipients().all(|r| r != "Bounced@Example.com"))
    );
}

#[tokio::test]
async fn test_senderless_payload_never_queued() {
    let h = Harness::new();
    h.enqueue(&message("Later", Priority::Low, 0)).await;

    let senderless = Payload {
        to: vec!["reader@example.com".to_string()],
        subject: "No sender".to_string(),
        ..Default::default()
    };
    let result = make_message(&h.store, senderless, None, Priority::High).await;
    assert!(matches!(result, Err(ComposeError::NoSender)));
    assert_eq!(h.store.count().await.unwrap(), 1);

    // Nothing unsendable sits ahead of the low-priority message
    let report = h.engine().drain_once().await.unwrap();
    assert_eq!((report.sent, report.deferred), (1, 0));
    assert_eq!(h.transport.sent_subjects(), vec!["Later"]);
}

#[tokio::test]
async fn test_connection_reuse_by_params() {
    let h = Harness::new();
    let p = TransportParams {
        host: Some("relay-p.example.com".to_string()),
        ..Default::default()
    };
    let q = TransportParams {
        host: Some("relay-q.example.com".to_string()),
        ..Default::default()
    };

    for (i, params) in [Some(p.clone()), Some(p.clone()), Some(q.clone())]
        .into_iter()
        .enumerate()
    {
        let mut m = message(&format!("M{}", i + 1), Priority::Medium, i64::try_from(i).unwrap());
        m.transport_params = params;
        h.enqueue(&m).await;
    }

    let report = h.engine().drain_once().await.unwrap();

    assert_eq!(report.sent, 3);
    assert_eq!(h.transport.opens(), 2);
    assert_eq!(h.transport.opened_with(), vec![Some(p), Some(q)]);
}

#[tokio::test]
async fn test_default_params_reuse_one_connection() {
    let h = Harness::new();
    for i in 0..3 {
        h.enqueue(&message(&format!("M{i}"), Priority::Medium, i)).await;
    }

    h.engine().drain_once().await.unwrap();
    assert_eq!(h.transport.opened_with(), vec![None]);
}

#[tokio::test]
async fn test_unclassified_failure_aborts_and_releases_lock() {
    let h = Harness::new();
    let first = message("First", Priority::High, 0);
    let second = message("Second", Priority::High, 1);
    let third = message("Third", Priority::High, 2);
    for m in [&first, &second, &third] {
        h.enqueue(m).await;
    }

    h.transport.fail_next_send(TransportFailure::Timeout("slow".to_string()));
    h.transport
        .fail_next_send(SendError::Internal("serializer exploded".to_string()));

    // Timeout defers First, then Second aborts the pass
    let result = h.engine().drain_once().await;
    assert!(matches!(result, Err(DeliveryError::Send(SendError::Internal(_)))));

    let second_stored = h.store.get(&second.id).await.unwrap().unwrap();
    assert_eq!(second_stored.priority, Priority::High);
    assert_eq!(h.store.log_entries().await.unwrap().len(), 1);

    // The lock was released: the next pass runs and finishes the queue
    let report = h.engine().drain_once().await.unwrap();
    assert!(!report.contended);
    assert_eq!(h.transport.sent_subjects(), vec!["Second", "Third"]);
    assert_eq!(
        h.store.get(&first.id).await.unwrap().map(|m| m.priority),
        Some(Priority::Deferred)
    );
}

#[tokio::test]
async fn test_file_store_and_file_lock_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::builder()
        .path(dir.path().join("store"))
        .build()
        .unwrap();
    store.init().unwrap();
    let transport = MemoryTransport::new();

    let engine = |lock: FileLock| {
        DeliveryEngine::new(
            Arc::new(store.clone()),
            Arc::new(transport.clone()),
            Arc::new(lock),
            LockWait::NonBlocking,
        )
    };

    store.insert(&message("A", Priority::High, 1)).await.unwrap();
    store.insert(&message("B", Priority::High, 0)).await.unwrap();

    // Another "process" holds the lock
    let other = FileLock::new(dir.path().join("lock"));
    let held = other.acquire(LockWait::NonBlocking).await.unwrap();
    assert!(held.is_granted());

    let contended = engine(FileLock::new(dir.path().join("lock")))
        .drain_once()
        .await
        .unwrap();
    assert!(contended.contended);
    drop(held);

    let report = engine(FileLock::new(dir.path().join("lock")))
        .drain_once()
        .await
        .unwrap();
    assert_eq!(report.sent, 2);
    assert_eq!(transport.sent_subjects(), vec!["B", "A"]);

    // A fresh handle on the same directory sees the committed outcome
    let reopened = FileStore::builder()
        .path(dir.path().join("store"))
        .build()
        .unwrap();
    assert_eq!(reopened.count().await.unwrap(), 0);
    assert_eq!(reopened.log_entries().await.unwrap().len(), 2);
}
