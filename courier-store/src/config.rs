use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{
    backends::{FileStore, MemoryStore},
    r#trait::{MessageStore, SuppressionList},
};

fn default_path() -> PathBuf {
    PathBuf::from("/var/spool/courier")
}

/// Which store backs the queue
///
/// File-backed store in RON config:
/// ```ron
/// Courier (
///     store: File(
///         path: "/var/spool/courier",
///     ),
/// )
/// ```
///
/// Memory-backed store for testing:
/// ```ron
/// Courier (
///     store: Memory,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum StoreConfig {
    /// Durable store in a directory (production)
    File {
        #[serde(default = "default_path")]
        path: PathBuf,
    },
    /// Process-local store (testing/development)
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::File {
            path: default_path(),
        }
    }
}

impl StoreConfig {
    /// Directory of a file-backed store, `None` for the memory store
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File { path } => Some(path),
            Self::Memory => None,
        }
    }

    /// Build and initialise the configured store
    ///
    /// # Errors
    /// If the file store path is invalid, or its directory cannot be created
    pub fn into_store(self) -> crate::Result<StoreType> {
        match self {
            Self::File { path } => {
                let store = FileStore::builder().path(path).build()?;
                store.init()?;
                Ok(StoreType::File(store))
            }
            Self::Memory => Ok(StoreType::Memory(MemoryStore::new())),
        }
    }
}

/// Initialised store
///
/// Hands out the message store and the suppression list as trait objects.
/// Both views of one `StoreType` share the same underlying data.
#[derive(Debug, Clone)]
pub enum StoreType {
    File(FileStore),
    Memory(MemoryStore),
}

impl StoreType {
    #[must_use]
    pub fn message_store(&self) -> Arc<dyn MessageStore> {
        match self {
            Self::File(store) => Arc::new(store.clone()),
            Self::Memory(store) => Arc::new(store.clone()),
        }
    }

    #[must_use]
    pub fn suppression_list(&self) -> Arc<dyn SuppressionList> {
        match self {
            Self::File(store) => Arc::new(store.clone()),
            Self::Memory(store) => Arc::new(store.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{Message, Payload, Priority};

    #[test]
    fn test_parse_file_config() {
        let config: StoreConfig =
            ron::from_str(r#"File(path: "/var/spool/courier-test")"#).expect("Failed to parse");
        assert_eq!(
            config.path(),
            Some(std::path::Path::new("/var/spool/courier-test"))
        );
    }

    #[test]
    fn test_parse_memory_config() {
        let config: StoreConfig = ron::from_str("Memory").expect("Failed to parse");
        assert_eq!(config, StoreConfig::Memory);
    }

    #[test]
    fn test_relative_path_rejected() {
        let config = StoreConfig::File {
            path: PathBuf::from("spool"),
        };
        assert!(matches!(
            config.into_store(),
            Err(crate::StoreError::Validation(
                crate::ValidationError::NotAbsolute(_)
            ))
        ));
    }

    #[tokio::test]
    async fn test_views_share_data() {
        let store = StoreConfig::Memory.into_store().expect("Failed to build");
        let messages = store.message_store();
        let suppressions = store.suppression_list();

        messages
            .insert(&Message::new(Payload::default(), None, Priority::Low))
            .await
            .expect("Failed to insert");
        suppressions
            .suppress("a@example.com")
            .await
            .expect("Failed to suppress");

        assert_eq!(store.message_store().count().await.expect("count"), 1);
        assert!(
            store
                .suppression_list()
                .is_suppressed("A@example.com")
                .await
                .expect("query")
        );
    }
}
