//! Inner relay tier
//!
//! Runs inside the environment's own context. It is the only tier that can read the ambient
//! credential and issue requests carrying the environment's identity. Requests arrive from
//! the outer tier over the page channel and are dispatched by envelope type.

use std::sync::Arc;

use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle
};
use tracing::{Level, event};

use crate::{
    domain::{
        constant::relay,
        envelope::{
            ActiveScope, Envelope, MessageKind, PingStatus, RelayFault, RelaySource, ScopeSwitch, ScopeSwitchAck,
            StepRequest, TokenGrant
        },
        error::OrchestratorError
    },
    port::{
        backend::TransactionBackend,
        credential::{Credential, CredentialSource},
        relay::RelayTransport
    }
};

pub struct InnerRelay {
    page:        Arc<dyn RelayTransport>,
    credentials: Arc<dyn CredentialSource>,
    backend:     Arc<dyn TransactionBackend>
}

impl InnerRelay {
    pub fn new(
        page: Arc<dyn RelayTransport>,
        credentials: Arc<dyn CredentialSource>,
        backend: Arc<dyn TransactionBackend>
    ) -> Self {
        Self { page, credentials, backend }
    }

    /// Subscribe to the page channel and serve requests from the outer tier until it closes
    pub fn spawn(self) -> JoinHandle<()> {
        let inbound = self.page.subscribe();
        tokio::spawn(self.serve_loop(inbound))
    }

    async fn serve_loop(self, mut inbound: broadcast::Receiver<Envelope>) {
        loop {
            match inbound.recv().await {
                Ok(envelope) if envelope.source == RelaySource::OuterRelay && envelope.kind.is_request() => {
                    let reply = self.dispatch(&envelope).await;
                    if let Err(e) = self.page.post(reply).await {
                        event!(Level::WARN, event = relay::DISPATCH_FAILED, tier = "inner", error = %e);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break
            }
        }
    }

    /// Serve one request; failures become a relay fault addressed to the same request
    pub async fn dispatch(&self, request: &Envelope) -> Envelope {
        match self.serve(request).await {
            Ok(reply) => reply,
            Err(e) => {
                event!(Level::WARN, event = relay::DISPATCH_FAILED, tier = "inner", kind = %request.kind, error = %e);
                let fault = Envelope::reply_to(request, RelaySource::InnerRelay, MessageKind::RelayFault);
                let reason = RelayFault { reason: e.to_string() };
                fault.clone().with_payload(&reason).unwrap_or(fault)
            }
        }
    }

    async fn serve(&self, request: &Envelope) -> Result<Envelope, OrchestratorError> {
        let reply = |kind| Envelope::reply_to(request, RelaySource::InnerRelay, kind);

        match request.kind {
            MessageKind::PingRequest => {
                reply(MessageKind::PingResponse).with_payload(&PingStatus { outer: false, inner: true })
            }
            MessageKind::TokenRequest => {
                let token = self.credentials.discover().await.map(|c| c.token);
                reply(MessageKind::TokenResponse).with_payload(&TokenGrant { token })
            }
            MessageKind::StepRequest => {
                let step: StepRequest = request.decode()?;
                let credential = match step.credential {
                    Some(token) => Credential::new("request", token),
                    None => self.credentials.discover().await.ok_or_else(|| {
                        OrchestratorError::Relay(format!(
                            "no ambient credential found ({})",
                            self.credentials.strategy()
                        ))
                    })?
                };
                let response = self.backend.send_step(step.step, &credential, &step.body).await?;
                reply(MessageKind::StepResponse).with_payload(&response)
            }
            MessageKind::ScopeSwitchRequest => {
                let switch: ScopeSwitch = request.decode()?;
                let accepted = self.backend.switch_scope(&switch.scope).await?;
                reply(MessageKind::ScopeSwitchResponse).with_payload(&ScopeSwitchAck { accepted })
            }
            MessageKind::ActiveScopeRequest => {
                let scope = self.backend.active_scope().await?;
                reply(MessageKind::ActiveScopeResponse).with_payload(&ActiveScope { scope })
            }
            MessageKind::PingResponse
            | MessageKind::TokenResponse
            | MessageKind::StepResponse
            | MessageKind::ScopeSwitchResponse
            | MessageKind::ActiveScopeResponse
            | MessageKind::RelayFault => {
                Err(OrchestratorError::Validation(format!("'{}' is not served by the inner relay", request.kind)))
            }
        }
    }
}
