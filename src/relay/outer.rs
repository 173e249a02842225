//! Outer relay tier
//!
//! Talks to the orchestrator over the upstream channel and to the inner tier over the page
//! channel. It cannot read session state itself: everything except liveness is forwarded to
//! the inner tier and the answer relayed back.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle
};
use tracing::{Level, event};
use uuid::Uuid;

use crate::{
    domain::{
        constant::relay,
        envelope::{Envelope, MessageKind, PingStatus, RelayFault, RelaySource},
        error::OrchestratorError
    },
    port::relay::RelayTransport
};

#[derive(Clone)]
pub struct OuterRelay {
    upstream:           Arc<dyn RelayTransport>,
    page:               Arc<dyn RelayTransport>,
    forward_timeout:    Duration,
    inner_ping_timeout: Duration
}

impl OuterRelay {
    pub fn new(
        upstream: Arc<dyn RelayTransport>,
        page: Arc<dyn RelayTransport>,
        forward_timeout: Duration,
        inner_ping_timeout: Duration
    ) -> Self {
        Self { upstream, page, forward_timeout, inner_ping_timeout }
    }

    /// Subscribe upstream and serve orchestrator requests until the channel closes
    pub fn spawn(self) -> JoinHandle<()> {
        let inbound = self.upstream.subscribe();
        tokio::spawn(self.serve_loop(inbound))
    }

    async fn serve_loop(self, mut inbound: broadcast::Receiver<Envelope>) {
        loop {
            match inbound.recv().await {
                Ok(envelope) if envelope.source == RelaySource::Orchestrator && envelope.kind.is_request() => {
                    let relay = self.clone();
                    tokio::spawn(async move { relay.handle(envelope).await });
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break
            }
        }
    }

    async fn handle(&self, request: Envelope) {
        let reply = match request.kind {
            MessageKind::PingRequest => {
                let inner_alive = self.forward(&request, self.inner_ping_timeout).await.is_ok();
                Envelope::reply_to(&request, RelaySource::OuterRelay, MessageKind::PingResponse)
                    .with_payload(&PingStatus { outer: true, inner: inner_alive })
            }
            _ => self.forward(&request, self.forward_timeout).await.map(|mut reply| {
                reply.source = RelaySource::OuterRelay;
                reply
            })
        };

        let reply = reply.unwrap_or_else(|e| {
            let fault = Envelope::reply_to(&request, RelaySource::OuterRelay, MessageKind::RelayFault);
            fault.clone().with_payload(&RelayFault { reason: e.to_string() }).unwrap_or(fault)
        });

        if let Err(e) = self.upstream.post(reply).await {
            event!(Level::WARN, event = relay::DISPATCH_FAILED, tier = "outer", error = %e);
        }
    }

    /// Hand a request to the inner tier and wait for its answer
    async fn forward(&self, request: &Envelope, timeout: Duration) -> Result<Envelope, OrchestratorError> {
        let correlation_id = request.correlation_id.unwrap_or_else(Uuid::new_v4);
        let mut inbound = self.page.subscribe();

        let mut hop = request.clone();
        hop.source = RelaySource::OuterRelay;
        hop.correlation_id = Some(correlation_id);
        self.page.post(hop).await?;

        let wait_reply = async {
            loop {
                match inbound.recv().await {
                    Ok(reply) if reply.source == RelaySource::InnerRelay && reply.answers(request.kind, correlation_id) => {
                        return Ok(reply);
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => {
                        return Err(OrchestratorError::Relay("page channel closed".to_string()));
                    }
                }
            }
        };

        tokio::time::timeout(timeout, wait_reply)
            .await
            .map_err(|_| OrchestratorError::Relay(format!("inner relay did not answer '{}'", request.kind)))?
    }
}
