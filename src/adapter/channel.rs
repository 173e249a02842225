//! In-process relay channel backed by a tokio broadcast channel

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{
    domain::{envelope::Envelope, error::OrchestratorError},
    port::relay::RelayTransport
};

/// Broadcast relay channel: every subscriber sees every envelope posted after it subscribed
pub struct BroadcastTransport {
    tx: broadcast::Sender<Envelope>
}

impl BroadcastTransport {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for BroadcastTransport {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl RelayTransport for BroadcastTransport {
    async fn post(&self, envelope: Envelope) -> Result<(), OrchestratorError> {
        // no subscribers yet
        let _ = self.tx.send(envelope);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}
