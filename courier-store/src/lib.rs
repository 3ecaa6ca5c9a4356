pub mod backends;
pub mod config;
pub mod error;
pub mod message;
pub(crate) mod state;
pub mod r#trait;
pub mod types;

pub use backends::{FileStore, FileStoreBuilder, MemoryStore};
pub use config::{StoreConfig, StoreType};
pub use error::{Result, SerializationError, StoreError, ValidationError};
pub use message::{
    Attachment, DeliveryLogEntry, DeliveryResult, Message, MessageViews, Payload, Priority, Security,
    SuppressionEntry, TransportParams, normalize_address,
};
pub use r#trait::{MessageStore, SuppressionList};
pub use types::{LogId, MessageId};
