use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::{
    DeliveryLogEntry, Message, MessageId, Priority, SuppressionEntry,
    r#trait::{MessageStore, SuppressionList},
    state::State,
};

/// In-memory store
///
/// Messages, the delivery log and the suppression list live behind a single
/// `RwLock`, so each trait method (including the paired mutate-and-log
/// operations) is one critical section. Nothing survives the process; this
/// backend is meant for tests and development.
///
/// Clones share the same underlying state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    /// Create a new empty memory-backed store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued messages, deferred ones included
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, message: &Message) -> crate::Result<()> {
        self.state.write()?.insert(message.clone())
    }

    async fn next_queued(&self) -> crate::Result<Option<Message>> {
        Ok(self.state.read()?.next_queued())
    }

    async fn get(&self, id: &MessageId) -> crate::Result<Option<Message>> {
        Ok(self.state.read()?.get(id))
    }

    async fn messages(&self) -> crate::Result<Vec<Message>> {
        Ok(self.state.read()?.messages())
    }

    async fn count(&self) -> crate::Result<usize> {
        Ok(self.state.read()?.count())
    }

    async fn mark_sent(&self, id: &MessageId, entry: &DeliveryLogEntry) -> crate::Result<()> {
        self.state.write()?.mark_sent(id, entry.clone())
    }

    async fn mark_deferred(&self, id: &MessageId, entry: &DeliveryLogEntry) -> crate::Result<()> {
        self.state.write()?.mark_deferred(id, entry.clone())
    }

    async fn update_priority(
        &self,
        id: &MessageId,
        from: Priority,
        to: Priority,
    ) -> crate::Result<bool> {
        self.state.write()?.update_priority(id, from, to)
    }

    async fn delete(&self, id: &MessageId) -> crate::Result<()> {
        self.state.write()?.delete(id)
    }

    async fn append_log(&self, entry: &DeliveryLogEntry) -> crate::Result<()> {
        self.state.write()?.append_log(entry.clone());
        Ok(())
    }

    async fn log_entries(&self) -> crate::Result<Vec<DeliveryLogEntry>> {
        Ok(self.state.read()?.log_entries())
    }
}

#[async_trait]
impl SuppressionList for MemoryStore {
    async fn is_suppressed(&self, address: &str) -> crate::Result<bool> {
        Ok(self.state.read()?.is_suppressed(address))
    }

    async fn suppress(&self, address: &str) -> crate::Result<bool> {
        Ok(self.state.write()?.suppress(address))
    }

    async fn unsuppress(&self, address: &str) -> crate::Result<bool> {
        Ok(self.state.write()?.unsuppress(address))
    }

    async fn suppressions(&self) -> crate::Result<Vec<SuppressionEntry>> {
        Ok(self.state.read()?.suppressions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeliveryResult, Payload};

    fn queued(priority: Priority) -> Message {
        Message::new(
            Payload {
                to: vec!["someone@example.com".to_string()],
                subject: "test".to_string(),
                ..Default::default()
            },
            None,
            priority,
        )
    }

    #[tokio::test]
    async fn test_memory_store_basic_operations() {
        let store = MemoryStore::new();
        let message = queued(Priority::Medium);

        store.insert(&message).await.expect("Failed to insert");
        assert_eq!(store.count().await.expect("Failed to count"), 1);

        let read = store
            .get(&message.id)
            .await
            .expect("Failed to read")
            .expect("Message missing");
        assert_eq!(read, message);

        store.delete(&message.id).await.expect("Failed to delete");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = MemoryStore::new();
        let message = queued(Priority::Low);

        store.insert(&message).await.expect("Failed to insert");
        assert!(matches!(
            store.insert(&message).await,
            Err(crate::StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemoryStore::new();
        let clone = store.clone();

        clone
            .insert(&queued(Priority::High))
            .await
            .expect("Failed to insert");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_deferred_keeps_message_and_logs() {
        let store = MemoryStore::new();
        let message = queued(Priority::High);
        store.insert(&message).await.expect("Failed to insert");

        let entry = DeliveryLogEntry::new(&message, DeliveryResult::Failure, "550 no such user");
        store
            .mark_deferred(&message.id, &entry)
            .await
            .expect("Failed to defer");

        let stored = store
            .get(&message.id)
            .await
            .expect("Failed to read")
            .expect("Message missing");
        assert_eq!(stored.priority, Priority::Deferred);
        assert!(store.next_queued().await.expect("Failed to query").is_none());

        let log = store.log_entries().await.expect("Failed to read log");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].result, DeliveryResult::Failure);
    }

    #[tokio::test]
    async fn test_concurrent_inserts() {
        let store = MemoryStore::new();

        let mut handles = vec![];
        for _ in 0..100 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert(&queued(Priority::Medium)).await
            }));
        }

        for handle in handles {
            handle.await.expect("Task panicked").expect("Insert failed");
        }

        assert_eq!(store.len(), 100);
    }
}
