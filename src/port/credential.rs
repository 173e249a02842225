use std::fmt::{self, Debug};

use async_trait::async_trait;

/// Ambient credential read from inside the environment
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Where the credential was found
    pub origin: String,
    pub token:  String
}

impl Credential {
    pub fn new(origin: impl Into<String>, token: impl Into<String>) -> Self {
        Self { origin: origin.into(), token: token.into() }
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential").field("origin", &self.origin).field("token", &"<redacted>").finish()
    }
}

/// Capability to discover the environment's ambient credential
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn discover(&self) -> Option<Credential>;

    /// Human-readable strategy name for logs
    fn strategy(&self) -> &'static str;
}
