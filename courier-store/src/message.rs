//! Queue records: messages, delivery log entries and suppression entries

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{LogId, MessageId};

/// Delivery priority of a queued message.
///
/// Variants are declared in rank order, so the derived `Ord` sorts the most
/// urgent first. `Deferred` is a holding state rather than a delivery
/// priority: deferred messages are never selected for delivery and only leave
/// that state through an explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
    Deferred,
}

impl Priority {
    /// Numeric rank; lower ranks are delivered first
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
            Self::Deferred => 4,
        }
    }

    #[must_use]
    pub const fn is_deferred(self) -> bool {
        matches!(self, Self::Deferred)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Deferred => "deferred",
        })
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" | "1" => Ok(Self::High),
            "medium" | "2" => Ok(Self::Medium),
            "low" | "3" => Ok(Self::Low),
            "deferred" | "4" => Ok(Self::Deferred),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Connection security for a mail transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Security {
    /// No TLS at all
    Plaintext,
    /// Plain connection upgraded with STARTTLS
    StartTls,
    /// TLS from the first byte (SMTPS)
    Tls,
}

/// Per-message connection configuration.
///
/// Every field is optional; unset fields fall back to the configured default
/// transport. Two messages can share a transport connection exactly when
/// their parameters compare equal.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub security: Option<Security>,
}

impl fmt::Debug for TransportParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("security", &self.security)
            .finish()
    }
}

/// A file attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Mail content of a queued message.
///
/// Apart from the recipient lists, which are filtered against the suppression
/// list when the message is composed, the queue never looks inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Sender; the transport's default sender is used when unset
    pub from: Option<String>,
    pub to: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    /// HTML alternative to `body`
    pub html_body: Option<String>,
    pub attachments: Vec<Attachment>,
    pub headers: Vec<(String, String)>,
}

impl Payload {
    /// Sender address, empty when the transport default applies
    #[must_use]
    pub fn from_address(&self) -> &str {
        self.from.as_deref().unwrap_or_default()
    }

    /// Comma separated `to` list, as shown in listings
    #[must_use]
    pub fn to_addresses(&self) -> String {
        self.to.join(", ")
    }

    /// Every envelope recipient (`to` followed by `bcc`)
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to.iter().chain(self.bcc.iter()).map(String::as_str)
    }
}

/// A queued outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub payload: Payload,
    /// `None` means "use the default transport"
    pub transport_params: Option<TransportParams>,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
}

impl Message {
    /// Create a message enqueued now
    #[must_use]
    pub fn new(
        payload: Payload,
        transport_params: Option<TransportParams>,
        priority: Priority,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            payload,
            transport_params,
            priority,
            enqueued_at: Utc::now(),
        }
    }

    /// Override the enqueue time, e.g. when importing messages from elsewhere
    #[must_use]
    pub fn with_enqueued_at(mut self, enqueued_at: DateTime<Utc>) -> Self {
        self.enqueued_at = enqueued_at;
        self
    }

    /// Sort key for delivery order: rank, then age, then id
    #[must_use]
    pub fn delivery_key(&self) -> (Priority, DateTime<Utc>, &MessageId) {
        (self.priority, self.enqueued_at, &self.id)
    }

    #[must_use]
    pub const fn is_deferred(&self) -> bool {
        self.priority.is_deferred()
    }
}

/// Priority views over a list of messages, as shown by the admin listings
pub trait MessageViews {
    /// Messages at exactly `priority`
    fn at_priority(&self, priority: Priority) -> Vec<&Message>;

    /// Messages still eligible for delivery
    fn non_deferred(&self) -> Vec<&Message>;

    fn high_priority(&self) -> Vec<&Message> {
        self.at_priority(Priority::High)
    }

    fn medium_priority(&self) -> Vec<&Message> {
        self.at_priority(Priority::Medium)
    }

    fn low_priority(&self) -> Vec<&Message> {
        self.at_priority(Priority::Low)
    }

    fn deferred(&self) -> Vec<&Message> {
        self.at_priority(Priority::Deferred)
    }
}

impl MessageViews for [Message] {
    fn at_priority(&self, priority: Priority) -> Vec<&Message> {
        self.iter()
            .filter(|message| message.priority == priority)
            .collect()
    }

    fn non_deferred(&self) -> Vec<&Message> {
        self.iter().filter(|message| !message.is_deferred()).collect()
    }
}

/// Outcome recorded for a delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryResult {
    Success,
    Suppressed,
    Failure,
}

impl fmt::Display for DeliveryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Suppressed => "suppressed",
            Self::Failure => "failure",
        })
    }
}

impl FromStr for DeliveryResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "suppressed" => Ok(Self::Suppressed),
            "failure" => Ok(Self::Failure),
            other => Err(format!("unknown delivery result '{other}'")),
        }
    }
}

/// Append-only record of one delivery attempt.
///
/// Holds a snapshot of the message as it was when the attempt was made, so
/// it stays meaningful after the message itself is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryLogEntry {
    pub id: LogId,
    pub message_id: MessageId,
    pub payload: Payload,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    pub attempted_at: DateTime<Utc>,
    pub result: DeliveryResult,
    pub detail: String,
}

impl DeliveryLogEntry {
    /// Snapshot `message` for an attempt that ended in `result`
    #[must_use]
    pub fn new(message: &Message, result: DeliveryResult, detail: impl Into<String>) -> Self {
        Self {
            id: LogId::generate(),
            message_id: message.id.clone(),
            payload: message.payload.clone(),
            priority: message.priority,
            enqueued_at: message.enqueued_at,
            attempted_at: Utc::now(),
            result,
            detail: detail.into(),
        }
    }
}

/// An address that must never receive mail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub address: String,
    pub added_at: DateTime<Utc>,
}

/// Canonical form used for case-insensitive address comparison
#[must_use]
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_priority_rank_order() {
        let mut priorities = vec![
            Priority::Deferred,
            Priority::Low,
            Priority::High,
            Priority::Medium,
        ];
        priorities.sort();

        assert_eq!(
            priorities,
            vec![
                Priority::High,
                Priority::Medium,
                Priority::Low,
                Priority::Deferred
            ]
        );
        assert!(priorities.windows(2).all(|w| w[0].rank() < w[1].rank()));
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("HIGH".parse::<Priority>(), Ok(Priority::High));
        assert_eq!("2".parse::<Priority>(), Ok(Priority::Medium));
        assert_eq!(" deferred ".parse::<Priority>(), Ok(Priority::Deferred));
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_delivery_key_orders_by_rank_then_age() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();

        let old_low = Message::new(Payload::default(), None, Priority::Low).with_enqueued_at(t0);
        let new_high = Message::new(Payload::default(), None, Priority::High).with_enqueued_at(t1);
        let old_high = Message::new(Payload::default(), None, Priority::High).with_enqueued_at(t0);

        assert!(new_high.delivery_key() < old_low.delivery_key());
        assert!(old_high.delivery_key() < new_high.delivery_key());
    }

    #[test]
    fn test_message_views() {
        let messages = vec![
            Message::new(Payload::default(), None, Priority::High),
            Message::new(Payload::default(), None, Priority::Deferred),
            Message::new(Payload::default(), None, Priority::Low),
            Message::new(Payload::default(), None, Priority::High),
        ];

        assert_eq!(messages.high_priority().len(), 2);
        assert!(messages.medium_priority().is_empty());
        assert_eq!(messages.low_priority().len(), 1);
        assert_eq!(messages.deferred()[0].id, messages[1].id);
        assert_eq!(messages.non_deferred().len(), 3);
    }

    #[test]
    fn test_transport_params_debug_redacts_password() {
        let params = TransportParams {
            host: Some("smtp.example.com".to_string()),
            password: Some("hunter2".to_string()),
            ..Default::default()
        };

        let rendered = format!("{params:?}");
        assert!(rendered.contains("smtp.example.com"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_log_entry_snapshots_message() {
        let message = Message::new(
            Payload {
                to: vec!["a@example.com".to_string()],
                subject: "hello".to_string(),
                ..Default::default()
            },
            None,
            Priority::Low,
        );

        let entry = DeliveryLogEntry::new(&message, DeliveryResult::Failure, "refused");
        assert_eq!(entry.message_id, message.id);
        assert_eq!(entry.payload, message.payload);
        assert_eq!(entry.priority, Priority::Low);
        assert_eq!(entry.enqueued_at, message.enqueued_at);
        assert_eq!(entry.detail, "refused");
    }
}
