use async_trait::async_trait;
use courier_common::outgoing;
use courier_store::{Payload, TransportParams};

use crate::{
    error::SendError,
    transport::{Connection, Transport},
};

/// Logs every message at INFO instead of sending it
///
/// Never fails; useful for development setups without a relay.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleTransport;

#[async_trait]
impl Transport for ConsoleTransport {
    async fn open(
        &self,
        params: Option<&TransportParams>,
    ) -> Result<Box<dyn Connection>, SendError> {
        outgoing!(level = DEBUG, "Opening console transport with {params:?}");
        Ok(Box::new(ConsoleConnection))
    }
}

struct ConsoleConnection;

#[async_trait]
impl Connection for ConsoleConnection {
    async fn send(&mut self, payload: &Payload) -> Result<(), SendError> {
        outgoing!(
            level = INFO,
            "From: {}\nTo: {}\nBcc: {}\nSubject: {}\n\n{}",
            payload.from_address(),
            payload.to_addresses(),
            payload.bcc.join(", "),
            payload.subject,
            payload.body
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_console_always_accepts() {
        let mut connection = ConsoleTransport.open(None).await.expect("Failed to open");
        connection
            .send(&Payload::default())
            .await
            .expect("Console send failed");
    }
}
