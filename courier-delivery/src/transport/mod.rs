//! Mail transports
//!
//! A [`Transport`] opens [`Connection`]s; a connection sends payloads until
//! it is dropped. The delivery engine keeps one connection open for as long
//! as consecutive messages carry equal transport parameters.

pub mod console;
pub mod memory;
pub mod smtp;

use std::sync::Arc;

use async_trait::async_trait;
use courier_store::{Payload, TransportParams};
use serde::Deserialize;

pub use console::ConsoleTransport;
pub use memory::MemoryTransport;
pub use smtp::{SmtpConfig, SmtpTransport};

use crate::error::SendError;

/// Source of connections to a mail backend
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Open a connection using `params`, or the configured defaults when
    /// `params` is `None`. Fields left unset in `params` also fall back to
    /// the defaults.
    ///
    /// # Errors
    /// A [`SendError::Transport`] when the backend cannot be reached or
    /// refuses the session, anything else for unusable parameters
    async fn open(&self, params: Option<&TransportParams>)
    -> Result<Box<dyn Connection>, SendError>;
}

/// A live connection, exclusively owned by one drain pass
///
/// Dropping the connection closes it.
#[async_trait]
pub trait Connection: Send {
    /// Hand one payload to the backend
    ///
    /// # Errors
    /// [`SendError::Transport`] when the backend refuses the message or the
    /// connection breaks; anything else when the payload cannot be sent at all
    async fn send(&mut self, payload: &Payload) -> Result<(), SendError>;
}

/// Which backend delivers mail
///
/// ```ron
/// transport: Smtp(
///     host: "smtp.example.com",
///     port: 587,
///     security: StartTls,
/// ),
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum TransportConfig {
    /// Relay through an SMTP server
    Smtp(SmtpConfig),
    /// Write each message to the log instead of sending it
    Console,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Smtp(SmtpConfig::default())
    }
}

impl TransportConfig {
    /// Sender for payloads that do not name one
    #[must_use]
    pub fn default_from(&self) -> Option<&str> {
        match self {
            Self::Smtp(config) => config.default_from.as_deref(),
            Self::Console => None,
        }
    }

    #[must_use]
    pub fn into_transport(self) -> Arc<dyn Transport> {
        match self {
            Self::Smtp(config) => Arc::new(SmtpTransport::new(config)),
            Self::Console => Arc::new(ConsoleTransport),
        }
    }
}
