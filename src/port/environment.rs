use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    domain::{
        environment::{InstanceDescriptor, InstanceId, RelayTier},
        error::OrchestratorError
    },
    port::relay::RelayTransport
};

/// Port to the host that owns the environment instances
///
/// The host knows how to find instances, install the relay tiers into them, and reload
/// them. A reload destroys every relay tier installed in the instance.
#[async_trait]
pub trait EnvironmentHost: Send + Sync {
    /// Targeted lookup by attribute
    ///
    /// Hosts without query support return [`OrchestratorError::Unsupported`].
    async fn query(
        &self,
        attributes: &HashMap<&'static str, String>
    ) -> Result<Vec<InstanceDescriptor>, OrchestratorError>;

    /// Enumerate every available instance
    async fn list_instances(&self) -> Result<Vec<InstanceDescriptor>, OrchestratorError>;

    /// Install one relay tier into an instance
    async fn install_relay(&self, instance: &InstanceId, tier: RelayTier) -> Result<(), OrchestratorError>;

    /// The relay channel of an instance
    fn transport(&self, instance: &InstanceId) -> Result<Arc<dyn RelayTransport>, OrchestratorError>;

    /// Trigger a reload of the instance
    async fn reload(&self, instance: &InstanceId) -> Result<(), OrchestratorError>;

    /// Resolve once the instance finished reloading
    ///
    /// Callers bound this with their own timeout.
    async fn wait_reloaded(&self, instance: &InstanceId) -> Result<InstanceDescriptor, OrchestratorError>;
}
