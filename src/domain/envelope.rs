//! Relay wire envelope
//!
//! Every message crossing the relay channel is a tagged envelope `{source, type, payload?}`.
//! The set of message types is closed: requests and their replies are paired through
//! [`MessageKind::reply_kind`], which is what the bridge uses to satisfy its pending slot.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::domain::{error::OrchestratorError, transaction::SagaStep};

/// Who posted an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelaySource {
    Orchestrator,
    OuterRelay,
    InnerRelay
}

/// Closed set of envelope types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    PingRequest,
    PingResponse,
    TokenRequest,
    TokenResponse,
    StepRequest,
    StepResponse,
    ScopeSwitchRequest,
    ScopeSwitchResponse,
    ActiveScopeRequest,
    ActiveScopeResponse,
    /// Posted by a relay tier when it could not serve a request
    RelayFault
}

impl MessageKind {
    /// The reply type that satisfies a request of this type
    pub fn reply_kind(self) -> Option<MessageKind> {
        match self {
            MessageKind::PingRequest => Some(MessageKind::PingResponse),
            MessageKind::TokenRequest => Some(MessageKind::TokenResponse),
            MessageKind::StepRequest => Some(MessageKind::StepResponse),
            MessageKind::ScopeSwitchRequest => Some(MessageKind::ScopeSwitchResponse),
            MessageKind::ActiveScopeRequest => Some(MessageKind::ActiveScopeResponse),
            _ => None
        }
    }

    pub fn is_request(self) -> bool {
        self.reply_kind().is_some()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::PingRequest => "ping_request",
            MessageKind::PingResponse => "ping_response",
            MessageKind::TokenRequest => "token_request",
            MessageKind::TokenResponse => "token_response",
            MessageKind::StepRequest => "step_request",
            MessageKind::StepResponse => "step_response",
            MessageKind::ScopeSwitchRequest => "scope_switch_request",
            MessageKind::ScopeSwitchResponse => "scope_switch_response",
            MessageKind::ActiveScopeRequest => "active_scope_request",
            MessageKind::ActiveScopeResponse => "active_scope_response",
            MessageKind::RelayFault => "relay_fault"
        }
    }
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tagged envelope carried by the relay channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub source:         RelaySource,
    #[serde(rename = "type")]
    pub kind:           MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload:        Option<serde_json::Value>
}

impl Envelope {
    pub fn new(source: RelaySource, kind: MessageKind) -> Self {
        Self { source, kind, correlation_id: None, payload: None }
    }

    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Result<Self, OrchestratorError> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Build the reply to `request`, carrying its correlation id
    pub fn reply_to(request: &Envelope, source: RelaySource, kind: MessageKind) -> Self {
        Self { source, kind, correlation_id: request.correlation_id, payload: None }
    }

    /// Decode the payload into its typed form
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, OrchestratorError> {
        let payload = self.payload.clone().ok_or_else(|| {
            OrchestratorError::Relay(format!("envelope '{}' carries no payload", self.kind))
        })?;
        serde_json::from_value(payload)
            .map_err(|e| OrchestratorError::Serialization(format!("malformed '{}' payload: {}", self.kind, e)))
    }

    /// Whether this envelope answers a pending request of `request_kind` with `correlation_id`
    ///
    /// Replies without a correlation id are matched by type alone.
    pub fn answers(&self, request_kind: MessageKind, correlation_id: Uuid) -> bool {
        if self.source == RelaySource::Orchestrator {
            return false;
        }
        let kind_matches = Some(self.kind) == request_kind.reply_kind() || self.kind == MessageKind::RelayFault;
        let id_matches = self.correlation_id.map(|id| id == correlation_id).unwrap_or(true);
        kind_matches && id_matches
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingStatus {
    pub outer: bool,
    pub inner: bool
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub token: Option<String>
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRequest {
    pub step:       SagaStep,
    #[serde(default)]
    pub credential: Option<String>,
    pub body:       serde_json::Value
}

/// Raw network response of a saga step, as observed inside the environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResponse {
    pub status: u16,
    pub body:   String
}

impl StepResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSwitch {
    pub scope: String
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSwitchAck {
    pub accepted: bool
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveScope {
    pub scope: Option<String>
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayFault {
    pub reason: String
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = Envelope::new(RelaySource::Orchestrator, MessageKind::PingRequest);
        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire, json!({ "source": "orchestrator", "type": "ping_request" }));

        let reply: Envelope = serde_json::from_value(json!({
            "source": "outer_relay",
            "type": "ping_response",
            "payload": { "outer": true, "inner": false }
        }))
        .unwrap();
        assert_eq!(reply.decode::<PingStatus>().unwrap(), PingStatus { outer: true, inner: false });
    }

    #[test]
    fn test_answers_matches_reply_type_and_correlation() {
        let id = Uuid::new_v4();
        let request = Envelope::new(RelaySource::Orchestrator, MessageKind::TokenRequest).with_correlation_id(id);

        let reply = Envelope::reply_to(&request, RelaySource::InnerRelay, MessageKind::TokenResponse);
        assert!(reply.answers(MessageKind::TokenRequest, id));
        assert!(!reply.answers(MessageKind::PingRequest, id));
        assert!(!reply.answers(MessageKind::TokenRequest, Uuid::new_v4()));

        let echo = request.clone();
        assert!(!echo.answers(MessageKind::TokenRequest, id));

        let uncorrelated = Envelope::new(RelaySource::OuterRelay, MessageKind::TokenResponse);
        assert!(uncorrelated.answers(MessageKind::TokenRequest, id));
    }

    #[test]
    fn test_decode_rejects_missing_payload() {
        let envelope = Envelope::new(RelaySource::InnerRelay, MessageKind::StepResponse);
        assert!(matches!(envelope.decode::<StepResponse>(), Err(OrchestratorError::Relay(_))));
    }
}
