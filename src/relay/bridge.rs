//! Orchestrator side of the relay channel
//!
//! The channel gives no delivery or ordering guarantee, so every request goes through a
//! single pending slot: it is satisfied by the first envelope answering it, or times out.
//! A request issued while the slot is taken is rejected before anything is posted.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration
};

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::broadcast::error::RecvError;
use tracing::{Level, event};
use uuid::Uuid;

use crate::{
    domain::{
        constant::relay,
        envelope::{
            ActiveScope, Envelope, MessageKind, PingStatus, RelayFault, RelaySource, ScopeSwitch, ScopeSwitchAck,
            StepRequest, StepResponse, TokenGrant
        },
        environment::{InstanceId, RelayHandshakeStatus},
        error::OrchestratorError
    },
    port::{environment::EnvironmentHost, relay::RelayTransport}
};

/// Descriptor of the one outstanding cross-tier request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub correlation_id: Uuid,
    pub kind:           MessageKind,
    pub issued_at:      DateTime<Utc>
}

/// Clears the pending slot when the request finishes, however it finishes
struct PendingGuard<'a> {
    slot:           &'a Mutex<Option<PendingRequest>>,
    correlation_id: Uuid
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().map(|p| p.correlation_id) == Some(self.correlation_id) {
            slot.take();
        }
    }
}

/// Relay bridge into one environment instance
///
/// A bridge is only valid until the next reload of its instance.
pub struct RelayBridge {
    instance_id:     InstanceId,
    transport:       Arc<dyn RelayTransport>,
    pending:         Mutex<Option<PendingRequest>>,
    handshake:       Mutex<RelayHandshakeStatus>,
    request_timeout: Duration
}

impl RelayBridge {
    pub fn new(instance_id: InstanceId, transport: Arc<dyn RelayTransport>, request_timeout: Duration) -> Self {
        Self {
            instance_id,
            transport,
            pending: Mutex::new(None),
            handshake: Mutex::new(RelayHandshakeStatus::default()),
            request_timeout
        }
    }

    /// Open a fresh bridge on the instance's current relay channel
    pub fn connect(
        host: &dyn EnvironmentHost,
        instance_id: &InstanceId,
        request_timeout: Duration
    ) -> Result<Self, OrchestratorError> {
        Ok(Self::new(instance_id.clone(), host.transport(instance_id)?, request_timeout))
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Snapshot of the outstanding request, if any
    pub fn pending(&self) -> Option<PendingRequest> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn handshake(&self) -> RelayHandshakeStatus {
        self.handshake.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn record_handshake(&self, outer_alive: bool, inner_alive: bool) -> RelayHandshakeStatus {
        let mut handshake = self.handshake.lock().unwrap_or_else(PoisonError::into_inner);
        handshake.record(outer_alive, inner_alive);
        handshake.clone()
    }

    /// Forget liveness and drop the pending slot; called when the instance reloads
    pub fn invalidate(&self) {
        self.handshake.lock().unwrap_or_else(PoisonError::into_inner).reset();
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).take();
        event!(Level::DEBUG, event = relay::BRIDGE_INVALIDATED, instance = %self.instance_id);
    }

    fn claim(&self, kind: MessageKind) -> Result<PendingGuard<'_>, OrchestratorError> {
        let mut slot = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slot.as_ref() {
            event!(Level::WARN, event = relay::REQUEST_REJECTED, instance = %self.instance_id,
                   requested = %kind, pending = %existing.kind);
            return Err(OrchestratorError::RelayBusy(existing.kind.to_string()));
        }

        let correlation_id = Uuid::new_v4();
        *slot = Some(PendingRequest { correlation_id, kind, issued_at: Utc::now() });
        Ok(PendingGuard { slot: &self.pending, correlation_id })
    }

    /// Issue a request and wait for its reply with the default timeout
    pub async fn request(
        &self,
        kind: MessageKind,
        payload: Option<serde_json::Value>
    ) -> Result<Envelope, OrchestratorError> {
        self.request_within(kind, payload, self.request_timeout).await
    }

    /// Issue a request and wait at most `timeout` for its reply
    ///
    /// A relay fault answering the request is returned as an error; no reply in time is a
    /// [`OrchestratorError::RelayTimeout`].
    pub async fn request_within(
        &self,
        kind: MessageKind,
        payload: Option<serde_json::Value>,
        timeout: Duration
    ) -> Result<Envelope, OrchestratorError> {
        if !kind.is_request() {
            return Err(OrchestratorError::Validation(format!("'{}' is not a request type", kind)));
        }

        let guard = self.claim(kind)?;
        let correlation_id = guard.correlation_id;

        // Subscribe before posting so a fast reply cannot be missed
        let mut inbound = self.transport.subscribe();
        let mut envelope = Envelope::new(RelaySource::Orchestrator, kind).with_correlation_id(correlation_id);
        envelope.payload = payload;

        self.transport.post(envelope).await?;
        event!(Level::DEBUG, event = relay::REQUEST_SENT, instance = %self.instance_id, kind = %kind,
               correlation_id = %correlation_id);

        let wait_reply = async {
            loop {
                match inbound.recv().await {
                    Ok(reply) if reply.answers(kind, correlation_id) => return Ok(reply),
                    Ok(other) => {
                        event!(Level::TRACE, event = relay::ENVELOPE_IGNORED, kind = %other.kind,
                               source = ?other.source);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        event!(Level::WARN, event = relay::ENVELOPE_IGNORED, skipped = %skipped,
                               message = "receiver_lagged");
                    }
                    Err(RecvError::Closed) => {
                        return Err(OrchestratorError::Relay(format!("relay channel of {} closed", self.instance_id)));
                    }
                }
            }
        };

        let reply = match tokio::time::timeout(timeout, wait_reply).await {
            Ok(reply) => reply?,
            Err(_) => {
                event!(Level::WARN, event = relay::REQUEST_TIMED_OUT, instance = %self.instance_id, kind = %kind,
                       timeout_ms = %timeout.as_millis());
                return Err(OrchestratorError::RelayTimeout(kind.to_string()));
            }
        };
        drop(guard);

        if reply.kind == MessageKind::RelayFault {
            let fault: RelayFault = reply.decode()?;
            return Err(OrchestratorError::Relay(fault.reason));
        }

        event!(Level::DEBUG, event = relay::REPLY_RECEIVED, instance = %self.instance_id, kind = %reply.kind,
               correlation_id = %correlation_id);
        Ok(reply)
    }

    async fn typed_request<Req: Serialize, Rep: DeserializeOwned>(
        &self,
        kind: MessageKind,
        payload: Option<&Req>,
        timeout: Duration
    ) -> Result<Rep, OrchestratorError> {
        let payload = payload.map(serde_json::to_value).transpose()?;
        self.request_within(kind, payload, timeout).await?.decode()
    }

    /// Liveness query answered by the outer tier on behalf of both tiers
    pub async fn ping(&self, timeout: Duration) -> Result<PingStatus, OrchestratorError> {
        self.typed_request::<(), PingStatus>(MessageKind::PingRequest, None, timeout).await
    }

    /// Ambient credential token held by the inner tier
    pub async fn request_token(&self) -> Result<Option<String>, OrchestratorError> {
        let grant: TokenGrant =
            self.typed_request::<(), TokenGrant>(MessageKind::TokenRequest, None, self.request_timeout).await?;
        Ok(grant.token)
    }

    pub async fn send_step(&self, request: &StepRequest) -> Result<StepResponse, OrchestratorError> {
        self.typed_request(MessageKind::StepRequest, Some(request), self.request_timeout).await
    }

    pub async fn switch_scope(&self, scope: &str) -> Result<bool, OrchestratorError> {
        let ack: ScopeSwitchAck = self
            .typed_request(MessageKind::ScopeSwitchRequest, Some(&ScopeSwitch { scope: scope.to_string() }),
                           self.request_timeout)
            .await?;
        Ok(ack.accepted)
    }

    pub async fn active_scope(&self) -> Result<Option<String>, OrchestratorError> {
        let active: ActiveScope =
            self.typed_request::<(), ActiveScope>(MessageKind::ActiveScopeRequest, None, self.request_timeout).await?;
        Ok(active.scope)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use super::*;

    /// Loopback channel; optionally answers token requests after a delay
    struct LoopbackTransport {
        tx:          broadcast::Sender<Envelope>,
        reply_delay: Option<Duration>
    }

    impl LoopbackTransport {
        fn new(reply_delay: Option<Duration>) -> Arc<Self> {
            let (tx, _) = broadcast::channel(64);
            Arc::new(Self { tx, reply_delay })
        }
    }

    #[async_trait]
    impl RelayTransport for LoopbackTransport {
        async fn post(&self, envelope: Envelope) -> Result<(), OrchestratorError> {
            let _ = self.tx.send(envelope.clone());
            if let Some(delay) = self.reply_delay
                && envelope.kind == MessageKind::TokenRequest
            {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let reply = Envelope::reply_to(&envelope, RelaySource::OuterRelay, MessageKind::TokenResponse)
                        .with_payload(&TokenGrant { token: Some("tok".to_string()) })
                        .unwrap();
                    let _ = tx.send(reply);
                });
            }
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<Envelope> {
            self.tx.subscribe()
        }
    }

    async fn wait_for_pending(bridge: &RelayBridge) {
        for _ in 0..100 {
            if bridge.pending().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("request never became pending");
    }

    #[tokio::test]
    async fn test_second_request_rejected_while_first_pending() {
        let transport = LoopbackTransport::new(Some(Duration::from_millis(80)));
        let bridge = Arc::new(RelayBridge::new(InstanceId::new("tab"), transport, Duration::from_secs(2)));

        let first = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.request_token().await }
        });
        wait_for_pending(&bridge).await;

        let second = bridge.request(MessageKind::PingRequest, None).await;
        assert!(matches!(second, Err(OrchestratorError::RelayBusy(ref kind)) if kind == "token_request"));
        assert_eq!(bridge.pending().unwrap().kind, MessageKind::TokenRequest);

        let token = first.await.unwrap().unwrap();
        assert_eq!(token.as_deref(), Some("tok"));
        assert!(bridge.pending().is_none());
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out_and_frees_slot() {
        let bridge = RelayBridge::new(InstanceId::new("tab"), LoopbackTransport::new(None), Duration::from_millis(30));

        let result = bridge.request(MessageKind::PingRequest, None).await;
        assert!(matches!(result, Err(OrchestratorError::RelayTimeout(_))));
        assert!(bridge.pending().is_none());

        // The slot is usable again
        let result = bridge.request(MessageKind::ActiveScopeRequest, None).await;
        assert!(matches!(result, Err(OrchestratorError::RelayTimeout(_))));
    }

    #[tokio::test]
    async fn test_replies_are_not_requests() {
        let bridge = RelayBridge::new(InstanceId::new("tab"), LoopbackTransport::new(None), Duration::from_millis(30));
        let result = bridge.request(MessageKind::PingResponse, None).await;
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    }

    #[test]
    fn test_invalidate_resets_handshake() {
        let bridge = RelayBridge::new(InstanceId::new("tab"), LoopbackTransport::new(None), Duration::from_millis(30));
        bridge.record_handshake(true, true);
        assert!(bridge.handshake().both_alive());
        bridge.invalidate();
        assert!(!bridge.handshake().both_alive());
        assert!(bridge.handshake().last_probed_at.is_none());
    }
}
