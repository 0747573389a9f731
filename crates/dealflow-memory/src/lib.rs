pub mod memory;
mod row;
pub mod store;

use std::sync::Arc;

use dealflow_core::config::{StorageConfig, StorageMode};
use dealflow_core::error::Result;
use dealflow_core::traits::PersistenceStore;

pub use memory::MemoryStore;
pub use store::SqliteStore;

/// Open the store selected by `[storage]`.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn PersistenceStore>> {
    match config.mode {
        StorageMode::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageMode::Sqlite => Ok(Arc::new(SqliteStore::open(&config.db_path())?)),
    }
}
