//! In-process simulated environment
//!
//! Hosts a set of environment instances whose relay tiers are the real outer and inner
//! relays running over broadcast channels. A reload kills both tiers and keeps the instance
//! in `loading` for a configurable delay. Saga steps are answered by a [`ScriptedBackend`].

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering}
    },
    time::Duration
};

use async_trait::async_trait;
use serde_json::json;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{Level, event};

use crate::{
    adapter::channel::BroadcastTransport,
    domain::{
        constant::simulator,
        envelope::StepResponse,
        environment::{InstanceDescriptor, InstanceId, InstanceMatcher, RelayTier},
        error::OrchestratorError,
        transaction::SagaStep
    },
    port::{
        backend::TransactionBackend,
        credential::{Credential, CredentialSource},
        environment::EnvironmentHost,
        relay::RelayTransport
    },
    relay::{inner::InnerRelay, outer::OuterRelay}
};

/// Behaviour knobs of the simulated host
#[derive(Debug, Clone)]
pub struct SimulatorSettings {
    /// Time an instance stays in `loading` after a reload
    pub reload_delay:       Duration,
    /// When set, reloads never complete
    pub hang_reloads:       bool,
    /// Whether the host answers targeted lookups
    pub supports_query:     bool,
    /// How long the outer tier waits for the inner tier on forwarded requests
    pub forward_timeout:    Duration,
    /// How long the outer tier waits for the inner tier on liveness probes
    pub inner_ping_timeout: Duration
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            reload_delay:       Duration::from_millis(50),
            hang_reloads:       false,
            supports_query:     true,
            forward_timeout:    Duration::from_secs(4),
            inner_ping_timeout: Duration::from_millis(250)
        }
    }
}

struct SimulatedInstance {
    descriptor: InstanceDescriptor,
    upstream:   Arc<BroadcastTransport>,
    page:       Arc<BroadcastTransport>,
    outer:      Option<JoinHandle<()>>,
    inner:      Option<JoinHandle<()>>,
    loaded:     watch::Sender<bool>
}

impl SimulatedInstance {
    fn new(descriptor: InstanceDescriptor) -> Self {
        let (loaded, _) = watch::channel(true);
        Self {
            descriptor,
            upstream: Arc::new(BroadcastTransport::default()),
            page: Arc::new(BroadcastTransport::default()),
            outer: None,
            inner: None,
            loaded
        }
    }

    fn tier_running(handle: &Option<JoinHandle<()>>) -> bool {
        handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    fn kill_tiers(&mut self) {
        for handle in [self.outer.take(), self.inner.take()].into_iter().flatten() {
            handle.abort();
        }
    }
}

impl Drop for SimulatedInstance {
    fn drop(&mut self) {
        self.kill_tiers();
    }
}

/// Simulated host of environment instances
pub struct SimulatedHost {
    instances:        Mutex<HashMap<InstanceId, SimulatedInstance>>,
    order:            Mutex<Vec<InstanceId>>,
    credentials:      Arc<dyn CredentialSource>,
    backend:          Arc<dyn TransactionBackend>,
    settings:         SimulatorSettings,
    install_failures: AtomicUsize,
    installs:         AtomicUsize,
    reloads:          AtomicUsize
}

impl SimulatedHost {
    pub fn new(
        backend: Arc<dyn TransactionBackend>,
        credentials: Arc<dyn CredentialSource>,
        settings: SimulatorSettings
    ) -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            credentials,
            backend,
            settings,
            install_failures: AtomicUsize::new(0),
            installs: AtomicUsize::new(0),
            reloads: AtomicUsize::new(0)
        }
    }

    /// Register an instance
    pub fn add_instance(&self, descriptor: InstanceDescriptor) {
        let id = descriptor.id.clone();
        self.lock_instances().insert(id.clone(), SimulatedInstance::new(descriptor));
        self.order.lock().unwrap_or_else(PoisonError::into_inner).push(id);
    }

    /// Make the next `count` tier installations fail
    pub fn fail_next_installs(&self, count: usize) {
        self.install_failures.store(count, Ordering::SeqCst);
    }

    /// Number of successful tier installations so far
    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    /// Number of reloads triggered so far
    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    fn lock_instances(&self) -> std::sync::MutexGuard<'_, HashMap<InstanceId, SimulatedInstance>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unknown(instance: &InstanceId) -> OrchestratorError {
        OrchestratorError::Environment(format!("instance {} is gone", instance))
    }

    fn descriptors(&self) -> Vec<InstanceDescriptor> {
        let order = self.order.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let instances = self.lock_instances();
        order.iter().filter_map(|id| instances.get(id).map(|i| i.descriptor.clone())).collect()
    }
}

#[async_trait]
impl EnvironmentHost for SimulatedHost {
    async fn query(
        &self,
        attributes: &HashMap<&'static str, String>
    ) -> Result<Vec<InstanceDescriptor>, OrchestratorError> {
        if !self.settings.supports_query {
            return Err(OrchestratorError::Unsupported("query by attribute".to_string()));
        }

        let matcher = InstanceMatcher {
            instance_id:    attributes.get("id").map(|id| InstanceId::new(id.clone())),
            url_prefix:     attributes.get("url_prefix").cloned(),
            url_contains:   attributes.get("url_contains").cloned(),
            title_contains: attributes.get("title_contains").cloned()
        };
        Ok(self.descriptors().into_iter().filter(|d| matcher.matches(d)).collect())
    }

    async fn list_instances(&self) -> Result<Vec<InstanceDescriptor>, OrchestratorError> {
        Ok(self.descriptors())
    }

    async fn install_relay(&self, instance: &InstanceId, tier: RelayTier) -> Result<(), OrchestratorError> {
        let refused = self
            .install_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            event!(Level::DEBUG, event = simulator::RELAY_INSTALL_REFUSED, instance = %instance, tier = %tier);
            return Err(OrchestratorError::Environment(format!("injection of {} relay refused", tier)));
        }

        let mut instances = self.lock_instances();
        let sim = instances.get_mut(instance).ok_or_else(|| Self::unknown(instance))?;
        if !*sim.loaded.borrow() {
            return Err(OrchestratorError::Environment(format!("instance {} is still loading", instance)));
        }

        match tier {
            RelayTier::Outer if !SimulatedInstance::tier_running(&sim.outer) => {
                let relay = OuterRelay::new(
                    sim.upstream.clone(),
                    sim.page.clone(),
                    self.settings.forward_timeout,
                    self.settings.inner_ping_timeout
                );
                sim.outer = Some(relay.spawn());
            }
            RelayTier::Inner if !SimulatedInstance::tier_running(&sim.inner) => {
                let relay = InnerRelay::new(sim.page.clone(), self.credentials.clone(), self.backend.clone());
                sim.inner = Some(relay.spawn());
            }
            _ => return Ok(())
        }

        self.installs.fetch_add(1, Ordering::SeqCst);
        event!(Level::DEBUG, event = simulator::RELAY_INSTALLED, instance = %instance, tier = %tier);
        Ok(())
    }

    fn transport(&self, instance: &InstanceId) -> Result<Arc<dyn RelayTransport>, OrchestratorError> {
        let instances = self.lock_instances();
        let sim = instances.get(instance).ok_or_else(|| Self::unknown(instance))?;
        Ok(sim.upstream.clone())
    }

    async fn reload(&self, instance: &InstanceId) -> Result<(), OrchestratorError> {
        let loaded = {
            let mut instances = self.lock_instances();
            let sim = instances.get_mut(instance).ok_or_else(|| Self::unknown(instance))?;
            sim.kill_tiers();
            sim.loaded.send_replace(false);
            sim.loaded.clone()
        };
        self.reloads.fetch_add(1, Ordering::SeqCst);
        event!(Level::DEBUG, event = simulator::INSTANCE_RELOADING, instance = %instance);

        if !self.settings.hang_reloads {
            let delay = self.settings.reload_delay;
            let id = instance.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                loaded.send_replace(true);
                event!(Level::DEBUG, event = simulator::INSTANCE_RELOADED, instance = %id);
            });
        }
        Ok(())
    }

    async fn wait_reloaded(&self, instance: &InstanceId) -> Result<InstanceDescriptor, OrchestratorError> {
        let mut loaded = {
            let instances = self.lock_instances();
            instances.get(instance).ok_or_else(|| Self::unknown(instance))?.loaded.subscribe()
        };

        loaded
            .wait_for(|ready| *ready)
            .await
            .map_err(|_| OrchestratorError::Environment(format!("instance {} closed while loading", instance)))?;

        let instances = self.lock_instances();
        Ok(instances.get(instance).ok_or_else(|| Self::unknown(instance))?.descriptor.clone())
    }
}

/// A recorded step call
#[derive(Debug, Clone, PartialEq)]
pub struct StepCall {
    pub step:       SagaStep,
    pub credential: String,
    pub body:       serde_json::Value
}

/// Scriptable transaction backend
///
/// Each step answers from its script queue first and falls back to a canned success
/// response once the queue is empty.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts:         Mutex<HashMap<SagaStep, VecDeque<StepResponse>>>,
    calls:           Mutex<Vec<StepCall>>,
    active_scope:    Mutex<Option<String>>,
    /// When set, scope switches are accepted but never reflected
    sticky_scope:    bool,
    /// Artificial latency of every step
    latency:         Option<Duration>,
    token_sequence:  AtomicUsize
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_active_scope(self, scope: impl Into<String>) -> Self {
        *self.active_scope.lock().unwrap_or_else(PoisonError::into_inner) = Some(scope.into());
        self
    }

    pub fn with_sticky_scope(mut self) -> Self {
        self.sticky_scope = true;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue a response for the next call of `step`
    pub fn script(&self, step: SagaStep, response: StepResponse) -> &Self {
        self.scripts.lock().unwrap_or_else(PoisonError::into_inner).entry(step).or_default().push_back(response);
        self
    }

    pub fn calls(&self) -> Vec<StepCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn calls_of(&self, step: SagaStep) -> usize {
        self.calls().iter().filter(|c| c.step == step).count()
    }

    fn canned(&self, step: SagaStep) -> StepResponse {
        let n = self.token_sequence.fetch_add(1, Ordering::SeqCst);
        match step {
            SagaStep::Discover => StepResponse::new(200, json!({ "continuation_token": format!("cont-{}", n) }).to_string()),
            SagaStep::Propose => StepResponse::new(200, json!({ "confirmation_token": format!("conf-{}", n) }).to_string()),
            SagaStep::Commit => StepResponse::new(200, json!({ "status": "SUCCESS" }).to_string())
        }
    }
}

#[async_trait]
impl TransactionBackend for ScriptedBackend {
    async fn send_step(
        &self,
        step: SagaStep,
        credential: &Credential,
        body: &serde_json::Value
    ) -> Result<StepResponse, OrchestratorError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(StepCall {
            step,
            credential: credential.token.clone(),
            body: body.clone()
        });

        let scripted = self.scripts.lock().unwrap_or_else(PoisonError::into_inner).get_mut(&step).and_then(|q| q.pop_front());
        Ok(scripted.unwrap_or_else(|| self.canned(step)))
    }

    async fn switch_scope(&self, scope: &str) -> Result<bool, OrchestratorError> {
        if !self.sticky_scope {
            *self.active_scope.lock().unwrap_or_else(PoisonError::into_inner) = Some(scope.to_string());
        }
        Ok(true)
    }

    async fn active_scope(&self) -> Result<Option<String>, OrchestratorError> {
        Ok(self.active_scope.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::adapter::credential::{FallbackCredentialSource, session_storage};

    pub(crate) fn descriptor(id: &str, url: &str) -> InstanceDescriptor {
        InstanceDescriptor {
            id:           InstanceId::new(id),
            url:          url.to_string(),
            title:        format!("Console {}", id),
            active_scope: None
        }
    }

    /// A host with one instance `tab-1` at `https://console.example/app`
    pub(crate) fn host_with(
        backend: Arc<ScriptedBackend>,
        settings: SimulatorSettings
    ) -> Arc<SimulatedHost> {
        let storage = session_storage(&[("session_token", "tok-abc")]);
        let credentials = Arc::new(FallbackCredentialSource::from_keys(storage, &["auth_token", "session_token"]));
        let host = Arc::new(SimulatedHost::new(backend, credentials, settings));
        host.add_instance(descriptor("tab-1", "https://console.example/app"));
        host
    }

    pub(crate) fn fast_settings() -> SimulatorSettings {
        SimulatorSettings {
            reload_delay: Duration::from_millis(20),
            forward_timeout: Duration::from_millis(500),
            inner_ping_timeout: Duration::from_millis(100),
            ..SimulatorSettings::default()
        }
    }
}
