//! Selects a tier backend at configuration time.

use crate::error::StorageResult;
use crate::json_file::JsonFileStorage;
use crate::memory::MemoryProvider;
use crate::provider::DataProvider;
use crate::sqlite::SqliteStorage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Backend choice as written in a configuration file:
///
/// ```toml
/// [storage]
/// backend = "sqlite"
/// path = "data/pipeline.db"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    Memory,
    JsonFile { path: PathBuf },
    Sqlite { path: PathBuf },
}

impl StorageConfig {
    /// Opens the configured backend.
    pub fn open(&self) -> StorageResult<Arc<dyn DataProvider>> {
        Ok(match self {
            Self::Memory => Arc::new(MemoryProvider::new()),
            Self::JsonFile { path } => Arc::new(JsonFileStorage::open(path)?),
            Self::Sqlite { path } => Arc::new(SqliteStorage::open(path)?),
        })
    }
}
