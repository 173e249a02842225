use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration
};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::{
    adapter::storage::CheckpointBackend,
    domain::environment::InstanceMatcher,
    relay::probe::ProbeSettings,
    saga::{MarkerClassifier, SagaSettings}
};

/// Configuration of the orchestrator and the CLI
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// URL prefix identifying the target environment
    pub target_url_prefix:      String,
    /// Timeout of one cross-tier request
    pub request_timeout_ms:     u64,
    pub readiness_budget_ms:    u64,
    pub readiness_poll_ms:      u64,
    pub liveness_timeout_ms:    u64,
    /// Time allowed for the environment to come back after a reload
    pub reload_timeout_ms:      u64,
    pub scope_switch_budget_ms: u64,
    pub scope_poll_ms:          u64,
    pub success_markers:        Vec<String>,
    pub failure_markers:        Vec<String>,
    /// Propose/Commit statuses logged as a stale continuation token
    pub stale_token_statuses:   Vec<u16>,
    pub checkpoint_backend:     CheckpointBackend,
    /// Database directory of the rocksdb backend; defaults to the platform data directory
    pub checkpoint_path:        Option<PathBuf>
}

impl Default for Config {
    fn default() -> Self {
        let saga = SagaSettings::default();
        Self {
            target_url_prefix:      "https://".to_string(),
            request_timeout_ms:     5_000,
            readiness_budget_ms:    12_000,
            readiness_poll_ms:      300,
            liveness_timeout_ms:    1_000,
            reload_timeout_ms:      30_000,
            scope_switch_budget_ms: saga.scope_switch_budget.as_millis() as u64,
            scope_poll_ms:          saga.scope_poll_interval.as_millis() as u64,
            success_markers:        vec!["SUCCESS".to_string()],
            failure_markers:        vec!["FAILED".to_string(), "FAILURE".to_string()],
            stale_token_statuses:   saga.stale_statuses,
            checkpoint_backend:     CheckpointBackend::RocksDb,
            checkpoint_path:        None
        }
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reload_timeout(&self) -> Duration {
        Duration::from_millis(self.reload_timeout_ms)
    }

    pub fn matcher(&self) -> InstanceMatcher {
        InstanceMatcher::url_prefix(self.target_url_prefix.clone())
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            budget:        Duration::from_millis(self.readiness_budget_ms),
            poll_interval: Duration::from_millis(self.readiness_poll_ms),
            ping_timeout:  Duration::from_millis(self.liveness_timeout_ms)
        }
    }

    pub fn saga_settings(&self) -> SagaSettings {
        SagaSettings {
            classifier: MarkerClassifier::new(self.success_markers.clone(), self.failure_markers.clone()),
            stale_statuses: self.stale_token_statuses.clone(),
            scope_switch_budget: Duration::from_millis(self.scope_switch_budget_ms),
            scope_poll_interval: Duration::from_millis(self.scope_poll_ms),
            ..SagaSettings::default()
        }
    }

    /// Checkpoint database directory, falling back to the platform data directory
    pub fn checkpoint_dir(&self) -> Result<PathBuf> {
        match &self.checkpoint_path {
            Some(path) => Ok(path.clone()),
            None => Ok(get_project_dirs()?.data_dir().join("checkpoints"))
        }
    }
}

/// Get the project directories for cross-platform config path resolution
pub fn get_project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "saga-runner").context("Failed to determine project directories")
}

/// Get the configuration directory path
pub fn get_config_dir() -> Result<PathBuf> {
    let project_dirs = get_project_dirs()?;
    Ok(project_dirs.config_dir().to_path_buf())
}

/// Get the config file path
pub fn get_config_file_path() -> Result<PathBuf> {
    let config_dir = get_config_dir()?;
    Ok(config_dir.join("config.yaml"))
}

/// Load configuration from the platform config file, creating it with defaults if missing
pub fn load_config() -> Result<Config> {
    load_config_from(&get_config_file_path()?)
}

/// Load configuration from `path`, creating it with defaults if it doesn't exist
pub fn load_config_from(path: &Path) -> Result<Config> {
    if path.exists() {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
    } else {
        let config = Config::default();
        save_config_to(&config, path)?;
        Ok(config)
    }
}

/// Save configuration to `path`
pub fn save_config_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
    }

    let content = serde_yaml::to_string(config).context("Failed to serialize config")?;

    fs::write(path, content).with_context(|| format!("Failed to write config file: {}", path.display()))?;

    Ok(())
}
