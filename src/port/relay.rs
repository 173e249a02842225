use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::{envelope::Envelope, error::OrchestratorError};

/// Broadcast-style relay channel into an environment instance
///
/// There is no delivery or ordering guarantee: every subscriber sees every envelope posted
/// after it subscribed, including the envelopes it posted itself.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Post an envelope onto the channel
    async fn post(&self, envelope: Envelope) -> Result<(), OrchestratorError>;

    /// Subscribe to envelopes posted from now on
    fn subscribe(&self) -> broadcast::Receiver<Envelope>;
}
