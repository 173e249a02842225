//! Environment locator
//!
//! Finds a live instance of the target environment. Hosts that can answer a targeted
//! attribute query are asked first; otherwise every instance is enumerated and filtered.

use std::sync::Arc;

use tracing::{Level, event};

use crate::{
    domain::{
        constant::locator,
        environment::{EnvironmentInstance, InstanceDescriptor, InstanceMatcher},
        error::OrchestratorError
    },
    port::environment::EnvironmentHost
};

pub struct EnvironmentLocator {
    host: Arc<dyn EnvironmentHost>
}

impl EnvironmentLocator {
    pub fn new(host: Arc<dyn EnvironmentHost>) -> Self {
        Self { host }
    }

    /// Locate the first instance matching `matcher`
    ///
    /// Returns [`OrchestratorError::NotFound`] when no instance matches.
    pub async fn locate(&self, matcher: &InstanceMatcher) -> Result<EnvironmentInstance, OrchestratorError> {
        if let Some(found) = self.targeted(matcher).await {
            event!(Level::DEBUG, event = locator::INSTANCE_FOUND, instance = %found.id, strategy = "query");
            return Ok(EnvironmentInstance::located(found));
        }

        event!(Level::DEBUG, event = locator::ENUMERATION_FALLBACK, matcher = %matcher);
        let found = self
            .host
            .list_instances()
            .await
            .map_err(|e| OrchestratorError::NotFound(format!("no environment instance available: {}", e)))?
            .into_iter()
            .find(|d| matcher.matches(d));

        match found {
            Some(descriptor) => {
                event!(Level::DEBUG, event = locator::INSTANCE_FOUND, instance = %descriptor.id,
                       strategy = "enumeration");
                Ok(EnvironmentInstance::located(descriptor))
            }
            None => {
                event!(Level::WARN, event = locator::INSTANCE_NOT_FOUND, matcher = %matcher);
                Err(OrchestratorError::NotFound(format!("no environment instance matches {}", matcher)))
            }
        }
    }

    async fn targeted(&self, matcher: &InstanceMatcher) -> Option<InstanceDescriptor> {
        event!(Level::TRACE, event = locator::TARGETED_LOOKUP, matcher = %matcher);
        match self.host.query(&matcher.attributes()).await {
            // The query is a hint; the predicate has the final word
            Ok(candidates) => candidates.into_iter().find(|d| matcher.matches(d)),
            Err(e) => {
                event!(Level::DEBUG, event = locator::TARGETED_LOOKUP_FAILED, error = %e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::simulator::{ScriptedBackend, SimulatorSettings, testing::*},
        domain::environment::{InstanceId, InstanceLifecycle}
    };

    #[tokio::test]
    async fn test_targeted_lookup_first_match_wins() {
        let host = host_with(Arc::new(ScriptedBackend::new()), fast_settings());
        host.add_instance(descriptor("tab-2", "https://console.example/other"));
        let locator = EnvironmentLocator::new(host);

        let instance = locator.locate(&InstanceMatcher::url_prefix("https://console.example/")).await.unwrap();
        assert_eq!(instance.id(), &InstanceId::new("tab-1"));
        assert_eq!(instance.lifecycle(), InstanceLifecycle::Located);
    }

    #[tokio::test]
    async fn test_enumeration_fallback_without_query_support() {
        let settings = SimulatorSettings { supports_query: false, ..fast_settings() };
        let host = host_with(Arc::new(ScriptedBackend::new()), settings);
        host.add_instance(descriptor("tab-2", "https://console.example/other"));
        let locator = EnvironmentLocator::new(host);

        let matcher = InstanceMatcher::url_prefix("https://console.example/").with_instance_id(InstanceId::new("tab-2"));
        let instance = locator.locate(&matcher).await.unwrap();
        assert_eq!(instance.id(), &InstanceId::new("tab-2"));
    }

    #[tokio::test]
    async fn test_no_match_is_not_found() {
        let host = host_with(Arc::new(ScriptedBackend::new()), fast_settings());
        let locator = EnvironmentLocator::new(host);

        let result = locator.locate(&InstanceMatcher::url_prefix("https://elsewhere.example/")).await;
        assert!(matches!(result, Err(OrchestratorError::NotFound(_))));
    }
}
