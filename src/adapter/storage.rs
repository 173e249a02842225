//! Checkpoint store implementations
//!
//! This module provides both in-memory and persistent (RocksDB) implementations
//! of the CheckpointStore trait.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use rocksdb::{DB, Options};
use tokio::sync::RwLock;
use tracing::{Level, event};

use crate::{
    domain::{checkpoint::Checkpoint, constant::checkpoint, error::OrchestratorError},
    port::checkpoint::CheckpointStore
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, clap::ValueEnum)]
pub enum CheckpointBackend {
    #[serde(rename = "inmemory")]
    #[value(name = "inmemory")]
    InMemory,
    #[serde(rename = "rocksdb")]
    #[value(name = "rocksdb")]
    RocksDb
}

/// In-memory checkpoint store
///
/// Suitable for tests and for embedders that persist elsewhere; the checkpoint is lost when
/// the process exits.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoint: Arc<RwLock<Option<Checkpoint>>>
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>, OrchestratorError> {
        Ok(self.checkpoint.read().await.clone())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), OrchestratorError> {
        *self.checkpoint.write().await = Some(checkpoint.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), OrchestratorError> {
        self.checkpoint.write().await.take();
        Ok(())
    }
}

/// RocksDB-based checkpoint store
///
/// Storage layout:
/// - `checkpoint:current` -> Checkpoint (JSON)
pub struct RocksDbCheckpointStore {
    db: Arc<DB>
}

const CHECKPOINT_KEY: &[u8] = b"checkpoint:current";

impl RocksDbCheckpointStore {
    /// Creates a store from an existing DB instance
    pub fn from_db(db: Arc<DB>) -> Self {
        Self { db }
    }

    /// Opens (or creates) a dedicated database at `path`
    pub fn open(path: &Path) -> Result<Self, OrchestratorError> {
        Ok(Self::from_db(Arc::new(open_db(path)?)))
    }
}

fn open_db(path: &Path) -> Result<DB, OrchestratorError> {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.set_compression_type(rocksdb::DBCompressionType::Snappy);
    DB::open(&opts, path).map_err(|e| OrchestratorError::Storage(format!("Failed to open RocksDB: {}", e)))
}

#[async_trait]
impl CheckpointStore for RocksDbCheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>, OrchestratorError> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || -> Result<Option<Checkpoint>, OrchestratorError> {
            match db.get(CHECKPOINT_KEY) {
                Ok(Some(data)) => {
                    let checkpoint: Checkpoint = serde_json::from_slice(&data).map_err(|e| {
                        OrchestratorError::Serialization(format!("Failed to deserialize checkpoint: {}", e))
                    })?;
                    Ok(Some(checkpoint))
                }
                Ok(None) => Ok(None),
                Err(e) => Err(OrchestratorError::Storage(format!("Failed to read from RocksDB: {}", e)))
            }
        })
        .await
        .map_err(|e| OrchestratorError::Generic(format!("Failed to load checkpoint: {}", e)))?
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), OrchestratorError> {
        let db = self.db.clone();
        let data = serde_json::to_vec(checkpoint)?;

        tokio::task::spawn_blocking(move || -> Result<(), OrchestratorError> {
            db.put(CHECKPOINT_KEY, data)
                .map_err(|e| OrchestratorError::Storage(format!("Failed to write to RocksDB: {}", e)))?;
            db.flush().map_err(|e| OrchestratorError::Storage(format!("Failed to flush RocksDB: {}", e)))
        })
        .await
        .map_err(|e| OrchestratorError::Generic(format!("Failed to save checkpoint: {}", e)))?
    }

    async fn clear(&self) -> Result<(), OrchestratorError> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || -> Result<(), OrchestratorError> {
            db.delete(CHECKPOINT_KEY)
                .map_err(|e| OrchestratorError::Storage(format!("Failed to delete from RocksDB: {}", e)))?;
            db.flush().map_err(|e| OrchestratorError::Storage(format!("Failed to flush RocksDB: {}", e)))
        })
        .await
        .map_err(|e| OrchestratorError::Generic(format!("Failed to clear checkpoint: {}", e)))?
    }
}

/// Shared RocksDB instance holder
static DB_INSTANCE: once_cell::sync::OnceCell<Arc<DB>> = once_cell::sync::OnceCell::new();

/// Factory for creating checkpoint stores based on configuration
pub struct CheckpointStoreFactory;

impl CheckpointStoreFactory {
    /// Creates a checkpoint store and initializes the shared DB if needed
    pub fn create(
        backend: CheckpointBackend,
        db_path: Option<&Path>
    ) -> Result<Arc<dyn CheckpointStore>, OrchestratorError> {
        match backend {
            CheckpointBackend::InMemory => Ok(Arc::new(InMemoryCheckpointStore::new())),
            CheckpointBackend::RocksDb => {
                let path = db_path.ok_or_else(|| {
                    OrchestratorError::Configuration("a checkpoint path is required for the rocksdb backend".to_string())
                })?;

                let db = DB_INSTANCE.get_or_try_init(|| {
                    event!(Level::DEBUG, event = checkpoint::CHECKPOINT_LOADED, path = %path.display(),
                           message = "opening_rocksdb");
                    open_db(path).map(Arc::new)
                })?;

                Ok(Arc::new(RocksDbCheckpointStore::from_db(db.clone())))
            }
        }
    }
}
