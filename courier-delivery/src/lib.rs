//! Drain engine for the courier mail queue
//!
//! This crate provides:
//! - the queue selector, yielding messages by priority then age
//! - the drain lock, keeping at most one pass running system-wide
//! - transports (SMTP relay, console, in-memory) behind one interface
//! - the delivery engine, which runs one pass and defers failed messages
//! - the drain loop, plus retry of deferred messages and message creation

pub mod compose;
mod engine;
mod error;
pub mod lock;
mod processor;
pub mod queue;
pub mod transport;

pub use compose::{bare_address, make_message};
pub use engine::{DeliveryEngine, DrainReport};
pub use error::{ComposeError, DeliveryError, LockError, SendError, TransportFailure};
pub use lock::{Acquire, DrainLock, FileLock, LockConfig, LockGuard, LockWait, MemoryLock};
pub use processor::DeliveryProcessor;
pub use queue::{
    QueueSelector,
    retry::{retry, retry_deferred},
};
pub use transport::{
    Connection, ConsoleTransport, MemoryTransport, SmtpConfig, SmtpTransport, Transport,
    TransportConfig,
};
