//! The drain loop

use std::{sync::Arc, time::Duration};

use courier_common::{Signal, internal};
use courier_store::MessageStore;
use courier_tracing::traced;
use serde::Deserialize;

use crate::{
    engine::{DeliveryEngine, DrainReport},
    error::DeliveryError,
    lock::{LockConfig, LockWait},
    transport::{Transport, TransportConfig},
};

const fn default_empty_queue_sleep() -> u64 {
    30
}

const fn default_contention_sleep() -> u64 {
    5
}

/// Repeatedly drains the queue until shut down
///
/// Configured from the `delivery` section of the configuration file:
/// ```ron
/// delivery: (
///     lock: File(path: "/var/lock/courier"),
///     lock_wait: NonBlocking,
///     empty_queue_sleep_secs: 30,
///     transport: Console,
/// ),
/// ```
#[derive(Debug, Deserialize)]
pub struct DeliveryProcessor {
    /// Lock serializing drain passes across processes
    #[serde(default)]
    pub lock: LockConfig,

    /// How long a pass waits for a contended lock
    #[serde(default)]
    pub lock_wait: LockWait,

    /// Pause after a pass that found nothing to deliver (in seconds)
    #[serde(default = "default_empty_queue_sleep")]
    pub empty_queue_sleep_secs: u64,

    /// Pause after a pass that could not take the lock, or failed (in seconds)
    #[serde(default = "default_contention_sleep")]
    pub contention_sleep_secs: u64,

    /// Backend messages are handed to
    #[serde(default)]
    pub transport: TransportConfig,

    /// The engine (initialized in `init()`)
    #[serde(skip)]
    engine: Option<DeliveryEngine>,
}

impl Default for DeliveryProcessor {
    fn default() -> Self {
        Self {
            lock: LockConfig::default(),
            lock_wait: LockWait::default(),
            empty_queue_sleep_secs: default_empty_queue_sleep(),
            contention_sleep_secs: default_contention_sleep(),
            transport: TransportConfig::default(),
            engine: None,
        }
    }
}

impl DeliveryProcessor {
    /// Build the engine from the configured lock and transport
    pub fn init(&mut self, store: Arc<dyn MessageStore>) {
        internal!("Initialising delivery processor ...");
        let transport = self.transport.clone().into_transport();
        self.init_with(store, transport);
    }

    /// Build the engine around an explicit transport, keeping the configured
    /// lock
    pub fn init_with(&mut self, store: Arc<dyn MessageStore>, transport: Arc<dyn Transport>) {
        let lock = self.lock.clone().into_lock();
        self.engine = Some(DeliveryEngine::new(store, transport, lock, self.lock_wait));
    }

    fn engine(&self) -> Result<&DeliveryEngine, DeliveryError> {
        self.engine.as_ref().ok_or_else(|| {
            DeliveryError::NotInitialised(
                "Delivery processor not initialised. Call init() first.".to_string(),
            )
        })
    }

    /// Run a single drain pass
    ///
    /// # Errors
    /// If the processor is not initialised, or the pass aborts
    pub async fn drain_once(&self) -> Result<DrainReport, DeliveryError> {
        self.engine()?.drain_once().await
    }

    /// How long to pause after a pass before the next one
    fn pause_after(&self, pass: &Result<DrainReport, DeliveryError>) -> Option<Duration> {
        match pass {
            Ok(report) if report.contended => Some(Duration::from_secs(self.contention_sleep_secs)),
            Ok(report) if report.found_empty() => {
                Some(Duration::from_secs(self.empty_queue_sleep_secs))
            }
            Ok(_) => None,
            Err(_) => Some(Duration::from_secs(self.contention_sleep_secs)),
        }
    }

    /// Drain until a shutdown signal arrives
    ///
    /// Passes that delivered something are followed immediately by another.
    /// After a pass that found nothing eligible (the queue is empty, or only
    /// holds deferred messages) the loop sleeps `empty_queue_sleep_secs`;
    /// after contention or an aborted pass it sleeps `contention_sleep_secs`.
    /// The signal is checked between passes and during sleeps, never in the
    /// middle of a pass.
    ///
    /// Setting `contention_sleep_secs: 0` retries straight after contention
    /// or an aborted pass, so only a pass that found nothing sleeps.
    ///
    /// # Errors
    /// If the processor was not initialised
    #[traced(instrument(level = tracing::Level::TRACE, skip_all), timing(precision = "s"))]
    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), DeliveryError> {
        let engine = self.engine()?;
        internal!("Delivery processor starting");

        loop {
            match shutdown.try_recv() {
                Ok(Signal::Shutdown | Signal::Finalised)
                | Err(tokio::sync::broadcast::error::TryRecvError::Closed) => break,
                Err(_) => {}
            }

            let pass = engine.drain_once().await;
            if let Err(e) = &pass {
                tracing::error!("Drain pass aborted: {e}");
            }

            let Some(pause) = self.pause_after(&pass) else {
                continue;
            };

            internal!(
                level = DEBUG,
                "Sleeping for {} seconds before checking the queue again",
                pause.as_secs()
            );

            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => break,
                        Err(e) => {
                            tracing::error!("Delivery processor shutdown channel error: {e}");
                            break;
                        }
                    }
                }
            }
        }

        internal!("Delivery processor shutdown complete");
        Ok(())
    }
}
