//! Tier backends for the tierstack data pipeline.
//!
//! Every tier (the local working set, the distributed cache and the durable
//! store) speaks the same [`DataProvider`] contract: exists, load, save,
//! remove and list, all by serialized form. This crate defines that contract
//! and ships three interchangeable backends:
//!
//! - [`MemoryProvider`]: a map in process memory; shared between pipelines it
//!   stands in for a distributed cache
//! - [`JsonFileStorage`]: one JSON file per object
//! - [`SqliteStorage`]: one SQLite row per object

mod config;
mod error;
mod json_file;
mod memory;
mod provider;
mod sqlite;

pub use config::StorageConfig;
pub use error::{StorageError, StorageResult};
pub use json_file::JsonFileStorage;
pub use memory::MemoryProvider;
pub use provider::{mock, DataProvider};
pub use sqlite::SqliteStorage;
