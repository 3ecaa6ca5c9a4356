//! System-wide drain lock
//!
//! At most one drain pass may run at a time, across every process sharing a
//! store. Contention is a normal outcome ([`Acquire::AlreadyHeld`],
//! [`Acquire::TimedOut`]), not an error. The lock is released when the
//! returned [`LockGuard`] is dropped, so every exit path of a pass releases
//! it.

use std::{
    fs::{File, OpenOptions},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use courier_common::internal;
use fs2::FileExt;
use serde::Deserialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::LockError;

/// Name of the lock file inside the lock directory
pub const LOCK_NAME: &str = "courier-drain.lock";

/// How often a bounded wait retries a contended file lock
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for a contended lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum LockWait {
    /// Give up immediately if another pass holds the lock
    #[default]
    NonBlocking,
    /// Wait up to `secs` seconds for the lock
    Bounded { secs: u64 },
}

/// Outcome of a lock acquisition
#[derive(Debug)]
pub enum Acquire {
    Granted(LockGuard),
    AlreadyHeld,
    TimedOut,
}

impl Acquire {
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }
}

#[derive(Debug)]
enum Held {
    File(File),
    Memory(OwnedMutexGuard<()>),
}

/// Proof of holding the drain lock; releases it on drop
#[derive(Debug)]
pub struct LockGuard {
    held: Option<Held>,
}

impl LockGuard {
    const fn new(held: Held) -> Self {
        Self { held: Some(held) }
    }

    /// Release the lock now
    pub fn release(mut self) {
        self.unlock();
    }

    fn unlock(&mut self) {
        match self.held.take() {
            Some(Held::File(file)) => {
                if let Err(e) = FileExt::unlock(&file) {
                    // Closing the file below releases the lock regardless
                    tracing::warn!("Failed to unlock drain lock file: {e}");
                }
                internal!(level = DEBUG, "Released drain lock");
            }
            Some(Held::Memory(guard)) => {
                drop(guard);
                internal!(level = DEBUG, "Released drain lock");
            }
            None => {}
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.unlock();
    }
}

/// Mutual exclusion between drain passes
#[async_trait]
pub trait DrainLock: Send + Sync + std::fmt::Debug {
    /// Try to take the lock under the `wait` policy
    ///
    /// # Errors
    /// When the lock service itself is broken, e.g. the lock file cannot be
    /// opened. Contention is reported through [`Acquire`].
    async fn acquire(&self, wait: LockWait) -> Result<Acquire, LockError>;
}

/// Advisory file lock, shared by every process using the same path
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Lock on `<directory>/courier-drain.lock`
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            path: directory.into().join(LOCK_NAME),
        }
    }

    #[must_use]
    pub const fn path(&self) -> &PathBuf {
        &self.path
    }

    fn open(&self) -> Result<File, LockError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Ok(OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)?)
    }

    /// `Ok(None)` when another holder has the lock
    fn try_lock(file: &File) -> Result<Option<()>, LockError> {
        match FileExt::try_lock_exclusive(file) {
            Ok(()) => Ok(Some(())),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl DrainLock for FileLock {
    async fn acquire(&self, wait: LockWait) -> Result<Acquire, LockError> {
        internal!(level = DEBUG, "Acquiring drain lock {} ...", self.path.display());
        let file = self.open()?;

        if Self::try_lock(&file)?.is_some() {
            internal!(level = DEBUG, "Acquired drain lock");
            return Ok(Acquire::Granted(LockGuard::new(Held::File(file))));
        }

        let LockWait::Bounded { secs } = wait else {
            return Ok(Acquire::AlreadyHeld);
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;

            if Self::try_lock(&file)?.is_some() {
                internal!(level = DEBUG, "Acquired drain lock");
                return Ok(Acquire::Granted(LockGuard::new(Held::File(file))));
            }
        }

        Ok(Acquire::TimedOut)
    }
}

/// Process-local lock for tests and single-process setups
///
/// Clones share the same lock.
#[derive(Debug, Clone, Default)]
pub struct MemoryLock {
    mutex: Arc<Mutex<()>>,
}

impl MemoryLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DrainLock for MemoryLock {
    async fn acquire(&self, wait: LockWait) -> Result<Acquire, LockError> {
        if let Ok(guard) = Arc::clone(&self.mutex).try_lock_owned() {
            return Ok(Acquire::Granted(LockGuard::new(Held::Memory(guard))));
        }

        match wait {
            LockWait::NonBlocking => Ok(Acquire::AlreadyHeld),
            LockWait::Bounded { secs } => match tokio::time::timeout(
                Duration::from_secs(secs),
                Arc::clone(&self.mutex).lock_owned(),
            )
            .await
            {
                Ok(guard) => Ok(Acquire::Granted(LockGuard::new(Held::Memory(guard)))),
                Err(_) => Ok(Acquire::TimedOut),
            },
        }
    }
}

fn default_lock_path() -> PathBuf {
    PathBuf::from("/var/lock/courier")
}

/// Which lock serializes drain passes
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum LockConfig {
    /// File lock in a directory; use this whenever more than one process
    /// may drain the same store
    File {
        #[serde(default = "default_lock_path")]
        path: PathBuf,
    },
    /// In-process lock
    Memory,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self::File {
            path: default_lock_path(),
        }
    }
}

impl LockConfig {
    #[must_use]
    pub fn into_lock(self) -> Arc<dyn DrainLock> {
        match self {
            Self::File { path } => Arc::new(FileLock::new(path)),
            Self::Memory => Arc::new(MemoryLock::new()),
        }
    }
}
