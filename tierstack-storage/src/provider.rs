//! The uniform contract every tier backend implements.

use crate::error::StorageResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use tierstack_types::{DataDescriptor, ObjectId};

/// CRUD by serialized form, keyed by (type, object id).
///
/// Implementations must be safe to share between tasks; the pipeline holds
/// them behind `Arc<dyn DataProvider>`.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Short backend name used in log lines.
    fn name(&self) -> &str;

    /// Returns true if the object is present in this tier.
    async fn exists(&self, descriptor: &DataDescriptor, id: ObjectId) -> StorageResult<bool>;

    /// Loads the serialized form, or `None` if the object is absent.
    async fn load_serialized(
        &self,
        descriptor: &DataDescriptor,
        id: ObjectId,
    ) -> StorageResult<Option<Value>>;

    /// Saves the serialized form, overwriting any previous state.
    async fn save(&self, descriptor: &DataDescriptor, id: ObjectId, data: Value)
    -> StorageResult<()>;

    /// Removes the object. Returns false if it was not present.
    async fn remove(&self, descriptor: &DataDescriptor, id: ObjectId) -> StorageResult<bool>;

    /// Lists the ids of every object of this type held by the tier.
    async fn list_ids(&self, descriptor: &DataDescriptor) -> StorageResult<HashSet<ObjectId>>;
}

/// Test doubles for exercising failure paths.
pub mod mock {
    use super::*;
    use crate::error::StorageError;

    /// A provider whose every operation fails with a backend error.
    #[derive(Debug, Default)]
    pub struct FailingProvider;

    impl FailingProvider {
        fn fail<T>(&self, op: &str) -> StorageResult<T> {
            Err(StorageError::Backend(format!("{op} refused by failing provider")))
        }
    }

    #[async_trait]
    impl DataProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn exists(&self, _: &DataDescriptor, _: ObjectId) -> StorageResult<bool> {
            self.fail("exists")
        }

        async fn load_serialized(
            &self,
            _: &DataDescriptor,
            _: ObjectId,
        ) -> StorageResult<Option<Value>> {
            self.fail("load")
        }

        async fn save(&self, _: &DataDescriptor, _: ObjectId, _: Value) -> StorageResult<()> {
            self.fail("save")
        }

        async fn remove(&self, _: &DataDescriptor, _: ObjectId) -> StorageResult<bool> {
            self.fail("remove")
        }

        async fn list_ids(&self, _: &DataDescriptor) -> StorageResult<HashSet<ObjectId>> {
            self.fail("list")
        }
    }
}
