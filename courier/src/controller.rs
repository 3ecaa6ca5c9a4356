use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use courier_common::{Signal, internal, logging, tracing};
use courier_delivery::DeliveryProcessor;
use courier_store::{StoreConfig, StoreType};
use courier_tracing::traced;
use serde::Deserialize;
use tokio::sync::broadcast;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "COURIER_CONFIG";

/// Top-level configuration, read once at startup
///
/// ```ron
/// Courier (
///     store: File(path: "/var/spool/courier"),
///     delivery: (
///         lock: File(path: "/var/lock/courier"),
///         transport: Console,
///     ),
/// )
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Courier {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub delivery: DeliveryProcessor,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Wait for SIGINT or SIGTERM, then tell everything to shut down
#[traced(instrument(level = tracing::Level::TRACE))]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered, finishing the current pass");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, finishing the current pass");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

/// Find the configuration file using the following precedence:
/// 1. `COURIER_CONFIG` environment variable
/// 2. ./courier.config.ron (current working directory)
/// 3. /etc/courier/courier.config.ron (system-wide config)
///
/// # Errors
/// If `COURIER_CONFIG` names a missing file, or no candidate exists
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
    }

    let default_paths = vec![
        PathBuf::from("./courier.config.ron"),
        PathBuf::from("/etc/courier/courier.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

impl Courier {
    /// Parse a configuration document
    ///
    /// # Errors
    /// If the document is not a valid configuration
    pub fn from_ron(content: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(content)?)
    }

    /// Read and parse the configuration file at `path`
    ///
    /// # Errors
    /// If the file cannot be read or parsed
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        })?;

        Self::from_ron(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {}", path.display(), e))
    }

    /// Open the configured store and wire the delivery processor to it
    ///
    /// # Errors
    /// If the store cannot be opened
    pub fn open(&mut self) -> anyhow::Result<StoreType> {
        let store = self.store.clone().into_store()?;
        self.delivery.init(store.message_store());
        Ok(store)
    }

    /// Run the drain loop until SIGINT or SIGTERM
    ///
    /// A pass in progress when the signal arrives runs to completion.
    ///
    /// # Errors
    /// If the store cannot be opened, or signal handling cannot be set up
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err), timing(precision = "s"))]
    pub async fn run(mut self) -> anyhow::Result<()> {
        logging::init();
        let _store = self.open()?;

        internal!("Controller running");

        let serve = self.delivery.serve(SHUTDOWN_BROADCAST.subscribe());
        tokio::pin!(serve);

        tokio::select! {
            r = &mut serve => r?,
            r = shutdown() => {
                r?;
                serve.await?;
            }
        }

        internal!("Shutting down...");

        Ok(())
    }
}
