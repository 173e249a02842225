//! Readiness handshake run before every job
//!
//! A cheap liveness query is tried first; if either tier is silent both tiers are
//! (re-)installed and the probe polls until they answer or the budget runs out.

use std::{sync::Arc, time::Duration};

use tokio::time::Instant;
use tracing::{Level, event};

use crate::{
    domain::{
        constant::{probe, relay},
        environment::{InstanceId, RelayHandshakeStatus, RelayTier},
        error::OrchestratorError
    },
    port::environment::EnvironmentHost,
    relay::bridge::RelayBridge
};

/// Timing knobs of the readiness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    /// Total time allowed for the handshake
    pub budget:        Duration,
    /// Delay between liveness polls
    pub poll_interval: Duration,
    /// Upper bound for a single liveness query
    pub ping_timeout:  Duration
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            budget:        Duration::from_secs(12),
            poll_interval: Duration::from_millis(300),
            ping_timeout:  Duration::from_secs(1)
        }
    }
}

pub struct ReadinessProbe {
    host:     Arc<dyn EnvironmentHost>,
    settings: ProbeSettings
}

impl ReadinessProbe {
    pub fn new(host: Arc<dyn EnvironmentHost>, settings: ProbeSettings) -> Self {
        Self { host, settings }
    }

    /// Ensure both relay tiers of `bridge`'s instance answer
    ///
    /// Returns [`OrchestratorError::Timeout`] when the budget expires first.
    pub async fn ensure_ready(&self, bridge: &RelayBridge) -> Result<RelayHandshakeStatus, OrchestratorError> {
        let instance = bridge.instance_id().clone();
        let deadline = Instant::now() + self.settings.budget;
        event!(Level::DEBUG, event = probe::PROBE_STARTED, instance = %instance,
               budget_ms = %self.settings.budget.as_millis());

        if self.poll_once(bridge, deadline).await {
            return Ok(bridge.handshake());
        }

        self.install_tiers(&instance).await;

        let mut polls = 0u32;
        loop {
            let now = Instant::now();
            if now >= deadline {
                event!(Level::WARN, event = probe::PROBE_TIMED_OUT, instance = %instance, polls = %polls,
                       handshake = ?bridge.handshake());
                return Err(OrchestratorError::Timeout(format!("relay tiers of {} not ready", instance)));
            }

            tokio::time::sleep(self.settings.poll_interval.min(deadline - now)).await;
            polls += 1;
            event!(Level::TRACE, event = probe::PROBE_POLLING, instance = %instance, poll = %polls);

            if self.poll_once(bridge, deadline).await {
                return Ok(bridge.handshake());
            }
        }
    }

    /// One liveness query; records the result on the bridge and reports whether both tiers answered
    async fn poll_once(&self, bridge: &RelayBridge, deadline: Instant) -> bool {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }

        let status = match bridge.ping(self.settings.ping_timeout.min(remaining)).await {
            Ok(status) => bridge.record_handshake(status.outer, status.inner),
            Err(_) => bridge.record_handshake(false, false)
        };

        if status.both_alive() {
            event!(Level::DEBUG, event = probe::PROBE_READY, instance = %bridge.instance_id());
        }
        status.both_alive()
    }

    /// Install both tiers; failures are logged and left to the polling loop
    async fn install_tiers(&self, instance: &InstanceId) {
        for tier in [RelayTier::Outer, RelayTier::Inner] {
            event!(Level::DEBUG, event = relay::TIER_INSTALLING, instance = %instance, tier = %tier);
            if let Err(e) = self.host.install_relay(instance, tier).await {
                event!(Level::WARN, event = relay::TIER_INSTALL_FAILED, instance = %instance, tier = %tier,
                       error = %e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::simulator::{ScriptedBackend, testing::*};

    fn quick() -> ProbeSettings {
        ProbeSettings {
            budget:        Duration::from_millis(600),
            poll_interval: Duration::from_millis(30),
            ping_timeout:  Duration::from_millis(200)
        }
    }

    #[tokio::test]
    async fn test_installs_tiers_then_reports_ready() {
        let host = host_with(Arc::new(ScriptedBackend::new()), fast_settings());
        let bridge = RelayBridge::connect(host.as_ref(), &InstanceId::new("tab-1"), Duration::from_secs(1)).unwrap();
        let probe = ReadinessProbe::new(host.clone(), quick());

        let status = probe.ensure_ready(&bridge).await.unwrap();
        assert!(status.both_alive());
        assert!(status.last_probed_at.is_some());
        assert_eq!(host.installs(), 2);

        // Second handshake answers on the first ping and installs nothing
        probe.ensure_ready(&bridge).await.unwrap();
        assert_eq!(host.installs(), 2);
    }

    #[tokio::test]
    async fn test_failed_installation_times_out() {
        let host = host_with(Arc::new(ScriptedBackend::new()), fast_settings());
        host.fail_next_installs(2);
        let bridge = RelayBridge::connect(host.as_ref(), &InstanceId::new("tab-1"), Duration::from_secs(1)).unwrap();
        let probe = ReadinessProbe::new(host.clone(), quick());

        let result = probe.ensure_ready(&bridge).await;
        assert!(matches!(result, Err(OrchestratorError::Timeout(_))));
        assert!(!bridge.handshake().both_alive());
        assert!(bridge.pending().is_none());
    }
}
