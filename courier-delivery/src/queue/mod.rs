//! Delivery order over the message store

pub mod retry;

use std::sync::Arc;

use courier_store::{Message, MessageStore};

/// Lazily yields queued messages in delivery order
///
/// Every step asks the store for the current best non-deferred message
/// (lowest rank, then oldest, then lowest id), so messages that arrive
/// mid-drain with a higher priority are picked up on the next step, and
/// messages the caller has sent or deferred in between never come back.
///
/// Once the store reports nothing left, the selector stays exhausted; build
/// a new one to look at the queue again.
#[derive(Debug)]
pub struct QueueSelector {
    store: Arc<dyn MessageStore>,
    exhausted: bool,
}

impl QueueSelector {
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            store,
            exhausted: false,
        }
    }

    /// The next message to deliver, `None` once nothing eligible remains
    ///
    /// # Errors
    /// If the store cannot be read
    pub async fn next(&mut self) -> courier_store::Result<Option<Message>> {
        if self.exhausted {
            return Ok(None);
        }

        let next = self.store.next_queued().await?;
        self.exhausted = next.is_none();
        Ok(next)
    }

    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
