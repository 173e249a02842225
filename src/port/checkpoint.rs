use async_trait::async_trait;

use crate::domain::{checkpoint::Checkpoint, error::OrchestratorError};

/// Port for durable checkpoint persistence
///
/// A store holds at most one checkpoint: the orchestrator drives one run at a time.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the stored checkpoint, if any
    async fn load(&self) -> Result<Option<Checkpoint>, OrchestratorError>;

    /// Replace the stored checkpoint
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), OrchestratorError>;

    /// Remove the stored checkpoint; clearing an empty store is not an error
    async fn clear(&self) -> Result<(), OrchestratorError>;
}
