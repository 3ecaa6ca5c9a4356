//! Typed error handling for delivery operations.
//!
//! Failures while handing a message to a transport split into two classes:
//! - transport-level failures ([`TransportFailure`]): the server or the
//!   network refused the message. The message is deferred and the pass
//!   carries on with a fresh connection.
//! - everything else: a bug or a broken environment. The pass is aborted
//!   and the message stays queued, unlogged.

use courier_store::StoreError;
use thiserror::Error;

/// Transport-level failure: the message is deferred, never the pass aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFailure {
    /// Could not reach or set up a session with the server.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The server rejected the credentials.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The server refused the envelope sender.
    #[error("Sender refused: {0}")]
    SenderRefused(String),

    /// The server refused every recipient.
    #[error("Recipients refused: {0}")]
    RecipientsRefused(String),

    /// The transport's own timeout expired.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The connection broke mid-session.
    #[error("Socket error: {0}")]
    Socket(String),
}

/// Error returned by a transport when opening a connection or sending.
#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Transport(#[from] TransportFailure),

    /// The payload cannot be turned into a valid mail (bad address, bad
    /// header, unknown content type).
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Internal transport error: {0}")]
    Internal(String),
}

impl SendError {
    /// Returns `true` for failures that defer the message.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Lock service faults. Contention is not one of them.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from building a new queued message.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The payload names no sender; nothing could ever send it.
    #[error("Message has no sender address")]
    NoSender,

    /// Every recipient was suppressed, or none was given.
    #[error("No recipients left to deliver to")]
    NoRecipients,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Error that aborts a drain pass.
///
/// Transport-level failures never show up here; they are absorbed by
/// deferring the message.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Delivery engine not initialised: {0}")]
    NotInitialised(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failure_is_transport() {
        let err = SendError::from(TransportFailure::RecipientsRefused(
            "550 no such user".to_string(),
        ));
        assert!(err.is_transport());
        assert_eq!(err.to_string(), "Recipients refused: 550 no such user");
    }

    #[test]
    fn test_invalid_message_is_not_transport() {
        let err = SendError::InvalidMessage("bad header".to_string());
        assert!(!err.is_transport());
    }

    #[test]
    fn test_delivery_error_wraps_store_error() {
        let err = DeliveryError::from(StoreError::Internal("poisoned".to_string()));
        assert!(err.to_string().contains("poisoned"));
    }
}
