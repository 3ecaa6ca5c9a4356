use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use courier_common::internal;
use courier_tracing::traced;
use fs2::FileExt;

use crate::{
    DeliveryLogEntry, Message, MessageId, Priority, SerializationError, StoreError,
    SuppressionEntry, ValidationError,
    r#trait::{MessageStore, SuppressionList},
    state::State,
};

const SNAPSHOT_FILE: &str = "courier.bin";
const LOCK_FILE: &str = "store.lock";

/// File-based store
///
/// The whole store (queue, delivery log and suppression list) is kept as one
/// bincode snapshot, `courier.bin`, inside the store directory. Every
/// operation:
/// 1. takes an advisory lock on `store.lock` (shared for reads, exclusive for
///    writes), which serializes access across processes as well as tasks
/// 2. loads the snapshot
/// 3. for writes, applies the mutation, writes the new snapshot to
///    `courier.bin.tmp`, syncs it and renames it over `courier.bin`
///
/// The rename is atomic on POSIX filesystems, so a crash at any point leaves
/// either the previous or the new state on disk, never a mixture. That is
/// what makes the paired mutate-and-log operations indivisible.
///
/// # Performance
/// Each operation reads (and writes) the whole snapshot. This suits the
/// queue sizes of an application mailer; it is not meant as a bulk MTA spool.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Validate a store path
    ///
    /// Rejects relative paths, paths containing `..` and paths inside
    /// system directories.
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    fn validate_path(path: &Path) -> Result<(), ValidationError> {
        if path
            .components()
            .any(|component| component == std::path::Component::ParentDir)
        {
            return Err(ValidationError::ParentComponent(path.display().to_string()));
        }

        if !path.is_absolute() {
            return Err(ValidationError::NotAbsolute(path.display().to_string()));
        }

        let sensitive_prefixes = [
            "/etc",
            "/bin",
            "/sbin",
            "/usr/bin",
            "/usr/sbin",
            "/boot",
            "/sys",
            "/proc",
            "/dev",
        ];

        if let Some(prefix) = sensitive_prefixes
            .iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(ValidationError::SystemDirectory {
                prefix: (*prefix).to_string(),
                path: path.display().to_string(),
            });
        }

        Ok(())
    }

    /// Create a new `FileStore` builder
    #[must_use]
    pub fn builder() -> FileStoreBuilder {
        FileStoreBuilder::default()
    }

    /// Directory holding the snapshot and its lock file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Initialize the store directory
    ///
    /// Creates the directory if it doesn't exist and removes a temporary
    /// snapshot left behind by a crash mid-write.
    ///
    /// # Errors
    /// - If the directory cannot be created
    /// - If the path exists but is not a directory
    pub fn init(&self) -> crate::Result<()> {
        internal!("Initialising store at {} ...", self.path.display());

        if !self.path.try_exists()? {
            internal!("{} does not exist, creating...", self.path.display());
            std::fs::create_dir_all(&self.path)?;
        } else if !self.path.is_dir() {
            return Err(ValidationError::NotDirectory(self.path.display().to_string()).into());
        }

        let temp = self.temp_path();
        if temp.try_exists()? {
            std::fs::remove_file(&temp)?;
            internal!(
                level = INFO,
                "Removed incomplete snapshot {} from a previous run",
                temp.display()
            );
        }

        Ok(())
    }

    fn snapshot_path(&self) -> PathBuf {
        self.path.join(SNAPSHOT_FILE)
    }

    fn temp_path(&self) -> PathBuf {
        self.path.join(format!("{SNAPSHOT_FILE}.tmp"))
    }

    fn open_lock(&self) -> crate::Result<File> {
        Ok(OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.path.join(LOCK_FILE))?)
    }

    fn load(&self) -> crate::Result<State> {
        let bytes = match std::fs::read(self.snapshot_path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(State::default()),
            Err(e) => return Err(e.into()),
        };

        let (state, read) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(SerializationError::from)?;

        if read != bytes.len() {
            return Err(SerializationError::Corrupted(format!(
                "{} trailing bytes after snapshot",
                bytes.len() - read
            ))
            .into());
        }

        Ok(state)
    }

    fn save(&self, state: &State) -> crate::Result<()> {
        let bytes = bincode::serde::encode_to_vec(state, bincode::config::standard())
            .map_err(SerializationError::from)?;

        let temp = self.temp_path();
        let mut file = File::create(&temp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp, self.snapshot_path())?;
        Ok(())
    }

    fn read_blocking<T>(&self, f: impl FnOnce(&State) -> T) -> crate::Result<T> {
        let lock = self.open_lock()?;
        FileExt::lock_shared(&lock)?;
        let result = self.load().map(|state| f(&state));
        FileExt::unlock(&lock)?;
        result
    }

    fn write_blocking<T>(
        &self,
        f: impl FnOnce(&mut State) -> crate::Result<T>,
    ) -> crate::Result<T> {
        let lock = self.open_lock()?;
        FileExt::lock_exclusive(&lock)?;
        let result = self.load().and_then(|mut state| {
            let value = f(&mut state)?;
            self.save(&state)?;
            Ok(value)
        });
        FileExt::unlock(&lock)?;
        result
    }

    /// Run a read-only operation on the blocking pool
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, fields(store = %self.path.display())), timing(precision = "us"))]
    async fn read<T, F>(&self, f: F) -> crate::Result<T>
    where
        F: FnOnce(&State) -> T + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.read_blocking(f)).await?
    }

    /// Run a mutation on the blocking pool; the snapshot is only replaced
    /// when `f` succeeds
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, fields(store = %self.path.display())), timing(precision = "us"))]
    async fn write<T, F>(&self, f: F) -> crate::Result<T>
    where
        F: FnOnce(&mut State) -> crate::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.write_blocking(f)).await?
    }
}

#[async_trait]
impl MessageStore for FileStore {
    async fn insert(&self, message: &Message) -> crate::Result<()> {
        let message = message.clone();
        self.write(move |state| state.insert(message)).await
    }

    async fn next_queued(&self) -> crate::Result<Option<Message>> {
        self.read(State::next_queued).await
    }

    async fn get(&self, id: &MessageId) -> crate::Result<Option<Message>> {
        let id = id.clone();
        self.read(move |state| state.get(&id)).await
    }

    async fn messages(&self) -> crate::Result<Vec<Message>> {
        self.read(State::messages).await
    }

    async fn count(&self) -> crate::Result<usize> {
        self.read(State::count).await
    }

    async fn mark_sent(&self, id: &MessageId, entry: &DeliveryLogEntry) -> crate::Result<()> {
        let (id, entry) = (id.clone(), entry.clone());
        self.write(move |state| state.mark_sent(&id, entry)).await
    }

    async fn mark_deferred(&self, id: &MessageId, entry: &DeliveryLogEntry) -> crate::Result<()> {
        let (id, entry) = (id.clone(), entry.clone());
        self.write(move |state| state.mark_deferred(&id, entry)).await
    }

    async fn update_priority(
        &self,
        id: &MessageId,
        from: Priority,
        to: Priority,
    ) -> crate::Result<bool> {
        let id = id.clone();
        self.write(move |state| state.update_priority(&id, from, to)).await
    }

    async fn delete(&self, id: &MessageId) -> crate::Result<()> {
        let id = id.clone();
        self.write(move |state| state.delete(&id)).await
    }

    async fn append_log(&self, entry: &DeliveryLogEntry) -> crate::Result<()> {
        let entry = entry.clone();
        self.write(move |state| {
            state.append_log(entry);
            Ok(())
        })
        .await
    }

    async fn log_entries(&self) -> crate::Result<Vec<DeliveryLogEntry>> {
        self.read(State::log_entries).await
    }
}

#[async_trait]
impl SuppressionList for FileStore {
    async fn is_suppressed(&self, address: &str) -> crate::Result<bool> {
        let address = address.to_string();
        self.read(move |state| state.is_suppressed(&address)).await
    }

    async fn suppress(&self, address: &str) -> crate::Result<bool> {
        let address = address.to_string();
        self.write(move |state| Ok(state.suppress(&address))).await
    }

    async fn unsuppress(&self, address: &str) -> crate::Result<bool> {
        let address = address.to_string();
        self.write(move |state| Ok(state.unsuppress(&address))).await
    }

    async fn suppressions(&self) -> crate::Result<Vec<SuppressionEntry>> {
        self.read(State::suppressions).await
    }
}

/// Builder for `FileStore`
#[derive(Debug, Default)]
pub struct FileStoreBuilder {
    path: PathBuf,
}

impl FileStoreBuilder {
    /// Set the store directory
    #[must_use]
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Build the final `FileStore`
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn build(self) -> Result<FileStore, StoreError> {
        FileStore::validate_path(&self.path)?;
        Ok(FileStore { path: self.path })
    }
}
