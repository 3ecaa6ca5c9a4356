//! The store contents and the operations on them, shared by every backend.
//!
//! Backends only decide how a [`State`] is guarded and persisted; each
//! operation here is applied inside a single critical section.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    DeliveryLogEntry, Message, MessageId, Priority, Result, StoreError, SuppressionEntry,
    normalize_address,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct State {
    messages: BTreeMap<MessageId, Message>,
    log: Vec<DeliveryLogEntry>,
    /// Keyed by normalized address
    suppressions: BTreeMap<String, SuppressionEntry>,
}

impl State {
    pub fn insert(&mut self, message: Message) -> Result<()> {
        if self.messages.contains_key(&message.id) {
            return Err(StoreError::AlreadyExists(message.id));
        }

        self.messages.insert(message.id.clone(), message);
        Ok(())
    }

    pub fn next_queued(&self) -> Option<Message> {
        self.messages
            .values()
            .filter(|message| !message.is_deferred())
            .min_by(|a, b| a.delivery_key().cmp(&b.delivery_key()))
            .cloned()
    }

    pub fn get(&self, id: &MessageId) -> Option<Message> {
        self.messages.get(id).cloned()
    }

    pub fn messages(&self) -> Vec<Message> {
        let mut messages: Vec<_> = self.messages.values().cloned().collect();
        messages.sort_by(|a, b| a.delivery_key().cmp(&b.delivery_key()));
        messages
    }

    pub fn count(&self) -> usize {
        self.messages.len()
    }

    pub fn mark_sent(&mut self, id: &MessageId, entry: DeliveryLogEntry) -> Result<()> {
        self.messages
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        self.log.push(entry);
        Ok(())
    }

    pub fn mark_deferred(&mut self, id: &MessageId, entry: DeliveryLogEntry) -> Result<()> {
        let message = self
            .messages
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        message.priority = Priority::Deferred;
        self.log.push(entry);
        Ok(())
    }

    pub fn update_priority(&mut self, id: &MessageId, from: Priority, to: Priority) -> Result<bool> {
        let message = self
            .messages
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if message.priority != from {
            return Ok(false);
        }

        message.priority = to;
        Ok(true)
    }

    pub fn delete(&mut self, id: &MessageId) -> Result<()> {
        self.messages
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    pub fn append_log(&mut self, entry: DeliveryLogEntry) {
        self.log.push(entry);
    }

    pub fn log_entries(&self) -> Vec<DeliveryLogEntry> {
        self.log.clone()
    }

    pub fn is_suppressed(&self, address: &str) -> bool {
        self.suppressions.contains_key(&normalize_address(address))
    }

    pub fn suppress(&mut self, address: &str) -> bool {
        let key = normalize_address(address);
        if self.suppressions.contains_key(&key) {
            return false;
        }

        self.suppressions.insert(
            key,
            SuppressionEntry {
                address: address.trim().to_string(),
                added_at: Utc::now(),
            },
        );
        true
    }

    pub fn unsuppress(&mut self, address: &str) -> bool {
        self.suppressions
            .remove(&normalize_address(address))
            .is_some()
    }

    pub fn suppressions(&self) -> Vec<SuppressionEntry> {
        self.suppressions.values().cloned().collect()
    }
}
