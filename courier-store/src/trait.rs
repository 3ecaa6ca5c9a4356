use async_trait::async_trait;

use crate::{DeliveryLogEntry, Message, MessageId, Priority, Result, SuppressionEntry};

/// Durable storage for queued messages and the delivery log.
///
/// Implementations must make every method atomic with respect to every other
/// method, including from other processes sharing the same store. In
/// particular `mark_sent` and `mark_deferred` pair a message mutation with a
/// log append, and no caller may ever observe one half without the other.
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    /// Persist a new message, entering it into the queue
    ///
    /// # Errors
    /// If the message cannot be stored, or a message with the same id exists
    async fn insert(&self, message: &Message) -> Result<()>;

    /// The next message to deliver: lowest priority rank, then oldest, then
    /// lowest id. Deferred messages are never returned.
    ///
    /// # Errors
    /// If the store cannot be read
    async fn next_queued(&self) -> Result<Option<Message>>;

    /// Look up a single message
    ///
    /// # Errors
    /// If the store cannot be read
    async fn get(&self, id: &MessageId) -> Result<Option<Message>>;

    /// Every message, deferred ones included, in delivery order
    ///
    /// # Errors
    /// If the store cannot be read
    async fn messages(&self) -> Result<Vec<Message>>;

    /// Total number of messages, deferred ones included
    ///
    /// # Errors
    /// If the store cannot be read
    async fn count(&self) -> Result<usize>;

    /// Delete the message and append `entry` as one atomic unit
    ///
    /// # Errors
    /// If the message does not exist or the store cannot be written
    async fn mark_sent(&self, id: &MessageId, entry: &DeliveryLogEntry) -> Result<()>;

    /// Move the message to [`Priority::Deferred`] and append `entry` as one
    /// atomic unit
    ///
    /// # Errors
    /// If the message does not exist or the store cannot be written
    async fn mark_deferred(&self, id: &MessageId, entry: &DeliveryLogEntry) -> Result<()>;

    /// Change the priority of a message from `from` to `to`.
    ///
    /// Returns `false`, changing nothing, when the message is not currently at
    /// `from`.
    ///
    /// # Errors
    /// If the message does not exist or the store cannot be written
    async fn update_priority(&self, id: &MessageId, from: Priority, to: Priority) -> Result<bool>;

    /// Remove a message without logging anything
    ///
    /// # Errors
    /// If the message does not exist or the store cannot be written
    async fn delete(&self, id: &MessageId) -> Result<()>;

    /// Append a standalone log entry
    ///
    /// # Errors
    /// If the store cannot be written
    async fn append_log(&self, entry: &DeliveryLogEntry) -> Result<()>;

    /// The delivery log, oldest attempt first
    ///
    /// # Errors
    /// If the store cannot be read
    async fn log_entries(&self) -> Result<Vec<DeliveryLogEntry>>;
}

/// Addresses that must never receive mail.
///
/// Membership is case-insensitive.
#[async_trait]
pub trait SuppressionList: Send + Sync + std::fmt::Debug {
    /// Is `address` on the list?
    ///
    /// # Errors
    /// If the store cannot be read
    async fn is_suppressed(&self, address: &str) -> Result<bool>;

    /// Add `address`; returns `false` if it was already present
    ///
    /// # Errors
    /// If the store cannot be written
    async fn suppress(&self, address: &str) -> Result<bool>;

    /// Remove `address`; returns `false` if it was not present
    ///
    /// # Errors
    /// If the store cannot be written
    async fn unsuppress(&self, address: &str) -> Result<bool>;

    /// Every entry, ordered by address
    ///
    /// # Errors
    /// If the store cannot be read
    async fn suppressions(&self) -> Result<Vec<SuppressionEntry>>;
}
