//! Moving deferred messages back into the queue

use courier_common::internal;
use courier_store::{MessageId, MessageStore, Priority, StoreError};

/// Return a deferred message to the queue at `new_priority`
///
/// Pass `Priority::default()` (medium) unless the caller has a reason to
/// jump or trail the queue. Returns `false`, changing nothing, when the
/// message is unknown, is not deferred, or `new_priority` is itself
/// `Deferred`.
///
/// # Errors
/// If the store cannot be read or written
pub async fn retry(
    store: &dyn MessageStore,
    id: &MessageId,
    new_priority: Priority,
) -> Result<bool, StoreError> {
    if new_priority.is_deferred() {
        return Ok(false);
    }

    match store
        .update_priority(id, Priority::Deferred, new_priority)
        .await
    {
        Ok(true) => {
            internal!(level = INFO, "Retrying message {id} at {new_priority} priority");
            Ok(true)
        }
        Ok(false) | Err(StoreError::NotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Return every deferred message to the queue; reports how many moved
///
/// # Errors
/// If the store cannot be read or written. Messages retried before the
/// failure stay retried.
pub async fn retry_deferred(
    store: &dyn MessageStore,
    new_priority: Priority,
) -> Result<usize, StoreError> {
    let mut retried = 0;

    for message in store.messages().await? {
        if message.is_deferred() && retry(store, &message.id, new_priority).await? {
            retried += 1;
        }
    }

    internal!(level = INFO, "Retried {retried} deferred messages");
    Ok(retried)
}
