use async_trait::async_trait;

use crate::{
    domain::{envelope::StepResponse, error::OrchestratorError, transaction::SagaStep},
    port::credential::Credential
};

/// Requests issued from inside the environment, carrying its identity
///
/// Only the inner relay tier talks to a backend.
#[async_trait]
pub trait TransactionBackend: Send + Sync {
    /// Issue one saga step request
    async fn send_step(
        &self,
        step: SagaStep,
        credential: &Credential,
        body: &serde_json::Value
    ) -> Result<StepResponse, OrchestratorError>;

    /// Ask the environment to switch its active scope; returns whether the request was accepted
    async fn switch_scope(&self, scope: &str) -> Result<bool, OrchestratorError>;

    /// The scope the environment currently reflects
    async fn active_scope(&self) -> Result<Option<String>, OrchestratorError>;
}
