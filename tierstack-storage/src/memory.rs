//! In-memory tier backend.
//!
//! One `MemoryProvider` shared (via `Arc`) between several pipelines behaves
//! like a cluster-wide cache, which is how tests simulate a distributed tier.

use crate::error::StorageResult;
use crate::provider::DataProvider;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tierstack_types::{DataDescriptor, ObjectId};

/// Serialized objects grouped by storage path.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    name: String,
    entries: RwLock<HashMap<String, HashMap<ObjectId, Value>>>,
}

impl MemoryProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::named("memory")
    }

    /// Creates an empty provider with a custom name for log lines.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Total number of objects held across every type.
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DataProvider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, descriptor: &DataDescriptor, id: ObjectId) -> StorageResult<bool> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get(&descriptor.storage_path())
            .is_some_and(|objects| objects.contains_key(&id)))
    }

    async fn load_serialized(
        &self,
        descriptor: &DataDescriptor,
        id: ObjectId,
    ) -> StorageResult<Option<Value>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get(&descriptor.storage_path())
            .and_then(|objects| objects.get(&id))
            .cloned())
    }

    async fn save(
        &self,
        descriptor: &DataDescriptor,
        id: ObjectId,
        data: Value,
    ) -> StorageResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(descriptor.storage_path())
            .or_default()
            .insert(id, data);
        Ok(())
    }

    async fn remove(&self, descriptor: &DataDescriptor, id: ObjectId) -> StorageResult<bool> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get_mut(&descriptor.storage_path())
            .is_some_and(|objects| objects.remove(&id).is_some()))
    }

    async fn list_ids(&self, descriptor: &DataDescriptor) -> StorageResult<HashSet<ObjectId>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get(&descriptor.storage_path())
            .map(|objects| objects.keys().copied().collect())
            .unwrap_or_default())
    }
}
