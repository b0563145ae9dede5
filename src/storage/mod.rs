//! Persistence for metric samples and alert events
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database, schema managed by migrations
//! - **In-Memory**: No persistence, for tests or throwaway runs
//!
//! [`series`] analyses what either backend returns for one metric.

use std::sync::Arc;

use tracing::info;

use crate::config::StorageConfig;

pub mod backend;
pub mod error;
pub mod memory;
pub mod series;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{AlertSink, HealthStatus, MetricsSink, SampleQuery, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;

/// Both sink views of one backend.
#[derive(Clone)]
pub struct Storage {
    pub metrics: Arc<dyn MetricsSink>,
    pub alerts: Arc<dyn AlertSink>,
}

impl Storage {
    pub fn from_backend<B: StorageBackend + 'static>(backend: Arc<B>) -> Self {
        Self {
            metrics: backend.clone(),
            alerts: backend,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(MemoryBackend::new()))
    }

    /// Health of the backend, or `UnhealthyBackend` when it reports a
    /// problem.
    pub async fn ensure_healthy(&self) -> StorageResult<HealthStatus> {
        let health = self.metrics.health_check().await?;
        if !health.healthy {
            return Err(StorageError::UnhealthyBackend(health.message));
        }
        Ok(health)
    }
}

/// Open the backend selected by the configuration.
pub async fn open(config: &StorageConfig) -> StorageResult<Storage> {
    match config {
        StorageConfig::None { .. } => {
            info!("using in-memory storage, samples are not persisted");
            Ok(Storage::in_memory())
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => {
            let backend = sqlite::SqliteBackend::new(path).await?;
            Ok(Storage::from_backend(Arc::new(backend)))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::InvalidConfig(
            "built without the storage-sqlite feature".to_string(),
        )),
    }
}
