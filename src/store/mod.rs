//! Durable run-record storage.
//!
//! The owning run engine is the only writer of a non-terminal run. Every
//! successful `save` is immediately visible to subsequent `load`s.

pub mod file;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{StorageBackend, StorageSettings};
use crate::error::StoreError;
use crate::model::BattleRun;

pub use file::FileRunStore;
pub use memory::MemoryRunStore;

/// Persisted-record seam for battle runs.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Writes the full record, replacing any previous version.
    async fn save(&self, run: &BattleRun) -> Result<(), StoreError>;

    /// Reads a record, `None` if it was never saved.
    async fn load(&self, run_id: &str) -> Result<Option<BattleRun>, StoreError>;

    /// Every stored record, oldest first.
    async fn list(&self) -> Result<Vec<BattleRun>, StoreError>;
}

/// Builds the store selected by configuration.
///
/// # Errors
///
/// Returns `StoreError::Io` if the data directory cannot be created.
pub async fn from_settings(settings: &StorageSettings) -> Result<Arc<dyn RunStore>, StoreError> {
    match settings.backend {
        StorageBackend::File => {
            let store = FileRunStore::open(&settings.data_dir).await?;
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => Ok(Arc::new(MemoryRunStore::new())),
    }
}
