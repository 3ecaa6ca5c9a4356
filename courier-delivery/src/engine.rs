//! One drain pass: lock, deliver everything eligible, release

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use courier_common::{internal, outgoing};
use courier_store::{
    DeliveryLogEntry, DeliveryResult, Message, MessageStore, StoreError, TransportParams,
};
use courier_tracing::traced;

use crate::{
    error::{DeliveryError, SendError, TransportFailure},
    lock::{Acquire, DrainLock, LockWait},
    queue::QueueSelector,
    transport::{Connection, Transport},
};

/// Counters for one drain pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    pub sent: usize,
    pub deferred: usize,
    pub elapsed: Duration,
    /// Another pass held the lock, so nothing was attempted
    pub contended: bool,
}

impl DrainReport {
    fn contended(elapsed: Duration) -> Self {
        Self {
            elapsed,
            contended: true,
            ..Default::default()
        }
    }

    /// Messages that reached an outcome during the pass
    #[must_use]
    pub const fn attempted(&self) -> usize {
        self.sent + self.deferred
    }

    /// The pass held the lock and found nothing to deliver
    #[must_use]
    pub const fn found_empty(&self) -> bool {
        !self.contended && self.attempted() == 0
    }
}

/// An open connection and the parameters it was opened with
struct Handle {
    params: Option<TransportParams>,
    connection: Box<dyn Connection>,
}

/// Drains the queue through a transport, one pass at a time
#[derive(Debug, Clone)]
pub struct DeliveryEngine {
    store: Arc<dyn MessageStore>,
    transport: Arc<dyn Transport>,
    lock: Arc<dyn DrainLock>,
    lock_wait: LockWait,
}

impl DeliveryEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        transport: Arc<dyn Transport>,
        lock: Arc<dyn DrainLock>,
        lock_wait: LockWait,
    ) -> Self {
        Self {
            store,
            transport,
            lock,
            lock_wait,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Run one drain pass
    ///
    /// Takes the drain lock under the configured wait policy; if another
    /// pass holds it, returns at once with a contended, empty report. While
    /// holding the lock, delivers every eligible message in order:
    /// - success deletes the message and logs `success`, atomically
    /// - a transport-level failure defers the message and logs `failure`
    ///   with the error, atomically, and discards the connection
    ///
    /// The lock is released on every exit path.
    ///
    /// # Errors
    /// Any failure that is not transport-level (store I/O, unusable payload,
    /// broken lock service) aborts the pass. Outcomes already committed stay;
    /// the message being attempted stays queued and unlogged.
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self), err), timing(precision = "ms"))]
    pub async fn drain_once(&self) -> Result<DrainReport, DeliveryError> {
        let start = Instant::now();

        internal!(level = DEBUG, "Acquiring drain lock ...");
        let guard = match self.lock.acquire(self.lock_wait).await? {
            Acquire::Granted(guard) => guard,
            Acquire::AlreadyHeld => {
                internal!(level = DEBUG, "Drain lock already held, quitting");
                return Ok(DrainReport::contended(start.elapsed()));
            }
            Acquire::TimedOut => {
                internal!(level = DEBUG, "Waiting for the drain lock timed out, quitting");
                return Ok(DrainReport::contended(start.elapsed()));
            }
        };

        let outcome = self.deliver_all().await;
        guard.release();

        let (sent, deferred) = outcome?;
        let report = DrainReport {
            sent,
            deferred,
            elapsed: start.elapsed(),
            contended: false,
        };

        internal!(
            level = INFO,
            "{} sent; {} deferred; done in {:.2} seconds",
            report.sent,
            report.deferred,
            report.elapsed.as_secs_f64()
        );

        Ok(report)
    }

    async fn deliver_all(&self) -> Result<(usize, usize), DeliveryError> {
        let mut selector = QueueSelector::new(Arc::clone(&self.store));
        let mut handle: Option<Handle> = None;
        let mut sent = 0;
        let mut deferred = 0;

        while let Some(message) = selector.next().await? {
            let mut current = match handle.take() {
                Some(open) if open.params == message.transport_params => open,
                stale => {
                    drop(stale);
                    match self.open(&message).await {
                        Ok(opened) => opened,
                        Err(SendError::Transport(failure)) => {
                            self.defer(&message, &failure).await?;
                            deferred += 1;
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            };

            outgoing!(
                level = INFO,
                "Sending message '{}' to {}",
                message.payload.subject,
                message.payload.to_addresses()
            );

            match current.connection.send(&message.payload).await {
                Ok(()) => {
                    let entry = DeliveryLogEntry::new(&message, DeliveryResult::Success, "");
                    self.store.mark_sent(&message.id, &entry).await?;
                    sent += 1;
                    handle = Some(current);
                }
                Err(SendError::Transport(failure)) => {
                    self.defer(&message, &failure).await?;
                    deferred += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok((sent, deferred))
    }

    async fn open(&self, message: &Message) -> Result<Handle, SendError> {
        internal!(
            level = DEBUG,
            "Opening transport connection with {:?}",
            message.transport_params
        );

        let connection = self
            .transport
            .open(message.transport_params.as_ref())
            .await?;

        Ok(Handle {
            params: message.transport_params.clone(),
            connection,
        })
    }

    async fn defer(&self, message: &Message, failure: &TransportFailure) -> Result<(), StoreError> {
        internal!(
            level = INFO,
            "Message {} deferred due to failure: {failure}",
            message.id
        );

        let entry = DeliveryLogEntry::new(message, DeliveryResult::Failure, failure.to_string());
        self.store.mark_deferred(&message.id, &entry).await
    }
}

#[cfg(test)]
mod tests {
    use courier_store::{MemoryStore, Payload, Priority};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{lock::MemoryLock, transport::MemoryTransport};

    fn engine(store: &MemoryStore, transport: &MemoryTransport) -> DeliveryEngine {
        DeliveryEngine::new(
            Arc::new(store.clone()),
            Arc::new(transport.clone()),
            Arc::new(MemoryLock::new()),
            LockWait::NonBlocking,
        )
    }

    fn message(subject: &str, to: &str) -> Message {
        Message::new(
            Payload {
                to: vec![to.to_string()],
                subject: subject.to_string(),
                ..Default::default()
            },
            None,
            Priority::Medium,
        )
    }

    #[tokio::test]
    async fn test_empty_queue_report() {
        let store = MemoryStore::new();
        let transport = MemoryTransport::new();

        let report = engine(&store, &transport).drain_once().await.expect("drain");
        assert!(report.found_empty());
        assert_eq!(transport.opens(), 0);
    }

    #[tokio::test]
    async fn test_failed_open_defers_and_continues() {
        let store = MemoryStore::new();
        let transport = MemoryTransport::new();
        let first = message("first", "a@example.com");
        let second = message("second", "b@example.com").with_enqueued_at(
            first.enqueued_at + chrono::Duration::seconds(1),
        );
        store.insert(&first).await.expect("insert");
        store.insert(&second).await.expect("insert");

        transport.fail_next_open(TransportFailure::ConnectionFailed("refused".to_string()));

        let report = engine(&store, &transport).drain_once().await.expect("drain");
        assert_eq!((report.sent, report.deferred), (1, 1));
        assert_eq!(transport.sent_subjects(), vec!["second"]);

        let stored = store.get(&first.id).await.expect("get").expect("deferred");
        assert_eq!(stored.priority, Priority::Deferred);
    }

    #[tokio::test]
    async fn test_transport_failure_discards_connection() {
        let store = MemoryStore::new();
        let transport = MemoryTransport::new();
        let first = message("first", "a@example.com");
        let second = message("second", "b@example.com").with_enqueued_at(
            first.enqueued_at + chrono::Duration::seconds(1),
        );
        store.insert(&first).await.expect("insert");
        store.insert(&second).await.expect("insert");

        transport.fail_next_send(TransportFailure::Socket("reset by peer".to_string()));

        let report = engine(&store, &transport).drain_once().await.expect("drain");
        assert_eq!((report.sent, report.deferred), (1, 1));
        assert_eq!(transport.opens(), 2);
    }

    #[tokio::test]
    async fn test_invalid_payload_aborts_pass() {
        let store = MemoryStore::new();
        let transport = MemoryTransport::new();
        let m = message("bad", "a@example.com");
        store.insert(&m).await.expect("insert");

        transport.fail_next_send(SendError::InvalidMessage("bad header".to_string()));

        let result = engine(&store, &transport).drain_once().await;
        assert!(matches!(result, Err(DeliveryError::Send(_))));

        let stored = store.get(&m.id).await.expect("get").expect("still queued");
        assert_eq!(stored.priority, Priority::Medium);
        assert!(store.log_entries().await.expect("log").is_empty());
    }
}
