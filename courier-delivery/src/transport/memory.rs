use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use courier_store::{Payload, TransportParams, normalize_address};

use crate::{
    error::{SendError, TransportFailure},
    transport::{Connection, Transport},
};

#[derive(Debug, Default)]
struct Recorder {
    opens: Vec<Option<TransportParams>>,
    sent: Vec<Payload>,
    open_failures: VecDeque<SendError>,
    send_failures: VecDeque<SendError>,
    refused: HashMap<String, TransportFailure>,
}

/// Records what it is asked to do instead of talking to a server
///
/// Failures can be scripted: one-shot open or send failures, and recipients
/// that are always refused. Clones share the same recording.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    recorder: Arc<Mutex<Recorder>>,
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn recorder(&self) -> MutexGuard<'_, Recorder> {
        self.recorder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `open` with `error`
    pub fn fail_next_open(&self, error: impl Into<SendError>) {
        self.recorder().open_failures.push_back(error.into());
    }

    /// Fail the next `send`, on any connection, with `error`
    pub fn fail_next_send(&self, error: impl Into<SendError>) {
        self.recorder().send_failures.push_back(error.into());
    }

    /// Refuse every payload addressed to `address`
    pub fn refuse(&self, address: &str, failure: TransportFailure) {
        self.recorder()
            .refused
            .insert(normalize_address(address), failure);
    }

    /// Number of connections opened so far
    #[must_use]
    pub fn opens(&self) -> usize {
        self.recorder().opens.len()
    }

    /// Parameters of every opened connection, in order
    #[must_use]
    pub fn opened_with(&self) -> Vec<Option<TransportParams>> {
        self.recorder().opens.clone()
    }

    /// Every accepted payload, in order
    #[must_use]
    pub fn sent(&self) -> Vec<Payload> {
        self.recorder().sent.clone()
    }

    /// Subjects of every accepted payload, in order
    #[must_use]
    pub fn sent_subjects(&self) -> Vec<String> {
        self.recorder()
            .sent
            .iter()
            .map(|payload| payload.subject.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(
        &self,
        params: Option<&TransportParams>,
    ) -> Result<Box<dyn Connection>, SendError> {
        let mut recorder = self.recorder();
        if let Some(error) = recorder.open_failures.pop_front() {
            return Err(error);
        }

        recorder.opens.push(params.cloned());
        Ok(Box::new(MemoryConnection {
            recorder: Arc::clone(&self.recorder),
        }))
    }
}

struct MemoryConnection {
    recorder: Arc<Mutex<Recorder>>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&mut self, payload: &Payload) -> Result<(), SendError> {
        let mut recorder = self
            .recorder
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(error) = recorder.send_failures.pop_front() {
            return Err(error);
        }

        if let Some(failure) = payload
            .recipients()
            .find_map(|address| recorder.refused.get(&normalize_address(address)))
        {
            return Err(failure.clone().into());
        }

        recorder.sent.push(payload.clone());
        Ok(())
    }
}
