//! Credential discovery strategies
//!
//! The inner relay reads the environment's ambient credential from its session storage.
//! Different deployments keep it under different keys, so discovery is composed from
//! small strategies rather than hard-coded.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::port::credential::{Credential, CredentialSource};

/// Session storage visible to the inner relay
pub type SessionStorage = Arc<RwLock<HashMap<String, String>>>;

/// Build session storage from key/value pairs
pub fn session_storage(entries: &[(&str, &str)]) -> SessionStorage {
    Arc::new(RwLock::new(entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()))
}

/// Reads a credential from one storage key
///
/// When `field` is set the stored value is parsed as JSON and the field is extracted.
pub struct StorageKeyCredential {
    storage: SessionStorage,
    key:     String,
    field:   Option<String>
}

impl StorageKeyCredential {
    pub fn new(storage: SessionStorage, key: impl Into<String>) -> Self {
        Self { storage, key: key.into(), field: None }
    }

    pub fn json_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

#[async_trait]
impl CredentialSource for StorageKeyCredential {
    async fn discover(&self) -> Option<Credential> {
        let raw = self.storage.read().await.get(&self.key).cloned()?;

        let token = match &self.field {
            None => raw,
            Some(field) => {
                let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
                value.get(field)?.as_str()?.to_string()
            }
        };

        if token.trim().is_empty() {
            return None;
        }
        Some(Credential::new(self.key.clone(), token))
    }

    fn strategy(&self) -> &'static str {
        "storage_key"
    }
}

/// Tries each strategy in order; the first credential found wins
#[derive(Default)]
pub struct FallbackCredentialSource {
    sources: Vec<Arc<dyn CredentialSource>>
}

impl FallbackCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Chain of plain storage-key lookups
    pub fn from_keys(storage: SessionStorage, keys: &[&str]) -> Self {
        keys.iter().fold(Self::new(), |chain, key| {
            chain.then(Arc::new(StorageKeyCredential::new(storage.clone(), *key)))
        })
    }
}

#[async_trait]
impl CredentialSource for FallbackCredentialSource {
    async fn discover(&self) -> Option<Credential> {
        for source in &self.sources {
            if let Some(credential) = source.discover().await {
                return Some(credential);
            }
        }
        None
    }

    fn strategy(&self) -> &'static str {
        "fallback_chain"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fallback_chain_uses_first_available_key() {
        let storage = session_storage(&[("legacy_token", "abc"), ("session_token", "  ")]);
        let source = FallbackCredentialSource::from_keys(storage, &["auth_token", "session_token", "legacy_token"]);

        let credential = source.discover().await.unwrap();
        assert_eq!(credential.origin, "legacy_token");
        assert_eq!(credential.token, "abc");
    }

    #[tokio::test]
    async fn test_json_field_extraction() {
        let storage = session_storage(&[("session", r#"{"csrf":"tok-1","user":"u"}"#), ("broken", "not json")]);

        let found = StorageKeyCredential::new(storage.clone(), "session").json_field("csrf").discover().await;
        assert_eq!(found.map(|c| c.token), Some("tok-1".to_string()));

        assert!(StorageKeyCredential::new(storage.clone(), "broken").json_field("csrf").discover().await.is_none());
        assert!(StorageKeyCredential::new(storage, "session").json_field("missing").discover().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_chain_finds_nothing() {
        assert!(FallbackCredentialSource::new().discover().await.is_none());
    }
}
