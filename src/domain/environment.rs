//! Environment instance handles, lifecycle and relay liveness
//!
//! The environment is the external, session-authenticated target the orchestrator drives.
//! An instance moves through `located → loading → ready → executing → reloading →
//! (ready | gone)`; every other transition is rejected.

use std::{
    collections::HashMap,
    fmt::{self, Display}
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::OrchestratorError;

/// Host-assigned identifier of an environment instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the host reports about an available instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub id:           InstanceId,
    pub url:          String,
    pub title:        String,
    /// Scope currently active in the environment, when the host can tell
    pub active_scope: Option<String>
}

/// Predicate used to pick the target environment among available instances
///
/// The attribute fields double as the query for hosts that support targeted lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceMatcher {
    /// Exact instance id (used when resuming a checkpointed run)
    pub instance_id:    Option<InstanceId>,
    /// Required URL prefix
    pub url_prefix:     Option<String>,
    /// Required substring of the URL
    pub url_contains:   Option<String>,
    /// Required substring of the title
    pub title_contains: Option<String>
}

impl InstanceMatcher {
    pub fn url_prefix(prefix: impl Into<String>) -> Self {
        Self { url_prefix: Some(prefix.into()), ..Self::default() }
    }

    pub fn with_instance_id(mut self, id: InstanceId) -> Self {
        self.instance_id = Some(id);
        self
    }

    pub fn matches(&self, descriptor: &InstanceDescriptor) -> bool {
        if let Some(id) = &self.instance_id
            && &descriptor.id != id
        {
            return false;
        }
        if let Some(prefix) = &self.url_prefix
            && !descriptor.url.starts_with(prefix.as_str())
        {
            return false;
        }
        if let Some(needle) = &self.url_contains
            && !descriptor.url.contains(needle.as_str())
        {
            return false;
        }
        if let Some(needle) = &self.title_contains
            && !descriptor.title.contains(needle.as_str())
        {
            return false;
        }
        true
    }

    /// Query attributes for hosts supporting query-by-attribute
    pub fn attributes(&self) -> HashMap<&'static str, String> {
        let mut attributes = HashMap::new();
        if let Some(id) = &self.instance_id {
            attributes.insert("id", id.0.clone());
        }
        if let Some(prefix) = &self.url_prefix {
            attributes.insert("url_prefix", prefix.clone());
        }
        if let Some(needle) = &self.url_contains {
            attributes.insert("url_contains", needle.clone());
        }
        if let Some(needle) = &self.title_contains {
            attributes.insert("title_contains", needle.clone());
        }
        attributes
    }
}

impl Display for InstanceMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.attributes().into_iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        parts.sort();
        if parts.is_empty() { write!(f, "<any>") } else { write!(f, "{}", parts.join(",")) }
    }
}

/// Lifecycle of an environment instance during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceLifecycle {
    Located,
    Loading,
    Ready,
    Executing,
    Reloading,
    Gone
}

impl InstanceLifecycle {
    pub fn can_transition_to(self, next: InstanceLifecycle) -> bool {
        use InstanceLifecycle::*;
        matches!(
            (self, next),
            (Located, Loading)
                | (Located, Ready)
                | (Loading, Ready)
                | (Loading, Gone)
                | (Ready, Executing)
                | (Ready, Reloading)
                | (Executing, Ready)
                | (Executing, Reloading)
                | (Reloading, Loading)
                | (Reloading, Gone)
        )
    }
}

/// Handle to the external target, owned by one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentInstance {
    pub descriptor: InstanceDescriptor,
    lifecycle:      InstanceLifecycle
}

impl EnvironmentInstance {
    pub fn located(descriptor: InstanceDescriptor) -> Self {
        Self { descriptor, lifecycle: InstanceLifecycle::Located }
    }

    pub fn id(&self) -> &InstanceId {
        &self.descriptor.id
    }

    pub fn lifecycle(&self) -> InstanceLifecycle {
        self.lifecycle
    }

    pub fn active_scope(&self) -> Option<&str> {
        self.descriptor.active_scope.as_deref()
    }

    pub fn set_active_scope(&mut self, scope: Option<String>) {
        self.descriptor.active_scope = scope;
    }

    pub fn transition(&mut self, next: InstanceLifecycle) -> Result<(), OrchestratorError> {
        if self.lifecycle == next {
            return Ok(());
        }
        if !self.lifecycle.can_transition_to(next) {
            return Err(OrchestratorError::Lifecycle(format!(
                "{} cannot move from {:?} to {:?}",
                self.descriptor.id, self.lifecycle, next
            )));
        }
        self.lifecycle = next;
        Ok(())
    }
}

/// The two relay tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayTier {
    /// Can talk to the orchestrator, cannot read environment session state
    Outer,
    /// Runs inside the environment context with its ambient credentials
    Inner
}

impl Display for RelayTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayTier::Outer => write!(f, "outer"),
            RelayTier::Inner => write!(f, "inner")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierLiveness {
    #[default]
    Unknown,
    Alive,
    Dead
}

/// Per-tier liveness plus the last time the tiers were probed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayHandshakeStatus {
    pub outer:          TierLiveness,
    pub inner:          TierLiveness,
    pub last_probed_at: Option<DateTime<Utc>>
}

impl RelayHandshakeStatus {
    pub fn record(&mut self, outer_alive: bool, inner_alive: bool) {
        self.outer = if outer_alive { TierLiveness::Alive } else { TierLiveness::Dead };
        self.inner = if inner_alive { TierLiveness::Alive } else { TierLiveness::Dead };
        self.last_probed_at = Some(Utc::now());
    }

    pub fn both_alive(&self) -> bool {
        self.outer == TierLiveness::Alive && self.inner == TierLiveness::Alive
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, url: &str) -> InstanceDescriptor {
        InstanceDescriptor {
            id:           InstanceId::new(id),
            url:          url.to_string(),
            title:        "Registration".to_string(),
            active_scope: None
        }
    }

    #[test]
    fn test_matcher_combines_all_attributes() {
        let matcher = InstanceMatcher {
            url_prefix: Some("https://reg.example.edu".to_string()),
            title_contains: Some("Registration".to_string()),
            ..InstanceMatcher::default()
        };

        assert!(matcher.matches(&descriptor("1", "https://reg.example.edu/plan")));
        assert!(!matcher.matches(&descriptor("2", "https://mail.example.edu")));
        assert!(!matcher.clone().with_instance_id(InstanceId::new("9")).matches(&descriptor(
            "1",
            "https://reg.example.edu/plan"
        )));
        assert!(InstanceMatcher::default().matches(&descriptor("3", "about:blank")));
    }

    #[test]
    fn test_lifecycle_rejects_illegal_transitions() {
        let mut instance = EnvironmentInstance::located(descriptor("1", "https://reg.example.edu"));
        instance.transition(InstanceLifecycle::Ready).unwrap();
        instance.transition(InstanceLifecycle::Executing).unwrap();
        instance.transition(InstanceLifecycle::Reloading).unwrap();
        assert!(instance.transition(InstanceLifecycle::Ready).is_err());
        instance.transition(InstanceLifecycle::Loading).unwrap();
        instance.transition(InstanceLifecycle::Ready).unwrap();
        assert_eq!(instance.lifecycle(), InstanceLifecycle::Ready);

        assert!(matches!(instance.transition(InstanceLifecycle::Located), Err(OrchestratorError::Lifecycle(_))));

        instance.transition(InstanceLifecycle::Reloading).unwrap();
        instance.transition(InstanceLifecycle::Gone).unwrap();
        assert!(instance.transition(InstanceLifecycle::Ready).is_err());
    }

    #[test]
    fn test_reload_can_be_abandoned_while_loading() {
        let mut instance = EnvironmentInstance::located(descriptor("1", "https://reg.example.edu"));
        instance.transition(InstanceLifecycle::Loading).unwrap();
        instance.transition(InstanceLifecycle::Ready).unwrap();
        instance.transition(InstanceLifecycle::Reloading).unwrap();
        instance.transition(InstanceLifecycle::Loading).unwrap();
        instance.transition(InstanceLifecycle::Gone).unwrap();
        assert_eq!(instance.lifecycle(), InstanceLifecycle::Gone);
    }

    #[test]
    fn test_handshake_status_resets_to_unknown() {
        let mut status = RelayHandshakeStatus::default();
        status.record(true, false);
        assert!(!status.both_alive());
        status.record(true, true);
        assert!(status.both_alive());
        status.reset();
        assert_eq!(status.outer, TierLiveness::Unknown);
        assert!(status.last_probed_at.is_none());
    }
}
