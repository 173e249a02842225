use thiserror::Error;

/// Common error types for the orchestrator
#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    /// No environment instance matched the locate predicate
    #[error("no environment instance matched: {0}")]
    NotFound(String),

    /// The host does not support the requested operation (e.g. targeted lookup)
    #[error("unsupported by host: {0}")]
    Unsupported(String),

    /// Environment host errors (install, reload, lookup)
    #[error("{0}")]
    Environment(String),

    /// A relay request was issued while another was still pending
    #[error("relay busy: a request of type '{0}' is already pending")]
    RelayBusy(String),

    /// A relay request received no matching reply in time
    #[error("relay request '{0}' timed out")]
    RelayTimeout(String),

    /// Relay channel errors (closed channel, unexpected reply)
    #[error("{0}")]
    Relay(String),

    /// Lifecycle transition rejected
    #[error("illegal lifecycle transition: {0}")]
    Lifecycle(String),

    /// A run is already in progress
    #[error("{0}")]
    RunInProgress(String),

    /// Validation errors
    #[error("{0}")]
    Validation(String),

    /// Checkpoint persistence errors
    #[error("{0}")]
    Storage(String),

    /// Configuration related errors
    #[error("{0}")]
    Configuration(String),

    /// File system related errors
    #[error("{0}")]
    FileSystem(String),

    /// Serialization/deserialization errors
    #[error("{0}")]
    Serialization(String),

    /// Spawn errors
    #[error("{0}")]
    Spawn(String),

    /// Actor messaging errors
    #[error("{0}")]
    Messaging(String),

    /// Timeout errors
    #[error("{0}")]
    Timeout(String),

    /// Generic errors with context
    #[error("{0}")]
    Generic(String)
}

/// Convert from anyhow::Error
impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Generic(err.to_string())
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        OrchestratorError::FileSystem(err.to_string())
    }
}

/// Convert from serde_yaml::Error
impl From<serde_yaml::Error> for OrchestratorError {
    fn from(err: serde_yaml::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

/// Convert from serde_json::Error
impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

/// Convert from ractor::SpawnErr
impl From<ractor::SpawnErr> for OrchestratorError {
    fn from(err: ractor::SpawnErr) -> Self {
        OrchestratorError::Spawn(err.to_string())
    }
}

/// Convert from rocksdb::Error
impl From<rocksdb::Error> for OrchestratorError {
    fn from(err: rocksdb::Error) -> Self {
        OrchestratorError::Storage(err.to_string())
    }
}
