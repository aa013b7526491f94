//! Registered types and their per-type factories.

use crate::data::{instantiate_erased, ErasedData, PipelineData};
use crate::error::{PipelineError, PipelineResult};
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tierstack_types::{DataDescriptor, ObjectId};
use tracing::debug;

/// Everything the pipeline knows about one registered type.
pub struct TypeEntry {
    type_id: TypeId,
    type_name: &'static str,
    descriptor: DataDescriptor,
    factory: fn(ObjectId) -> Box<dyn ErasedData>,
}

impl TypeEntry {
    fn of<T: PipelineData>(descriptor: DataDescriptor) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            descriptor,
            factory: instantiate_erased::<T>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn descriptor(&self) -> &DataDescriptor {
        &self.descriptor
    }

    pub(crate) fn instantiate(&self, id: ObjectId) -> Box<dyn ErasedData> {
        (self.factory)(id)
    }
}

impl fmt::Debug for TypeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeEntry")
            .field("type_name", &self.type_name)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

#[derive(Default)]
struct RegistryInner {
    by_type: HashMap<TypeId, Arc<TypeEntry>>,
    by_identifier: HashMap<String, Arc<TypeEntry>>,
}

/// Maps Rust types and storage identifiers to their [`TypeEntry`].
#[derive(Default)]
pub struct DataRegistry {
    inner: RwLock<RegistryInner>,
}

impl DataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under the descriptor. Returns the entry and whether it
    /// was newly added; registering the same type with the same descriptor
    /// again is a no-op.
    pub fn register<T: PipelineData>(
        &self,
        descriptor: DataDescriptor,
    ) -> PipelineResult<(Arc<TypeEntry>, bool)> {
        descriptor.validate()?;
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = inner.by_type.get(&TypeId::of::<T>()) {
            if existing.descriptor == descriptor {
                return Ok((Arc::clone(existing), false));
            }
            return Err(PipelineError::ConflictingRegistration(type_name::<T>()));
        }
        if let Some(existing) = inner.by_identifier.get(descriptor.identifier()) {
            return Err(PipelineError::DuplicateStorageIdentifier {
                identifier: descriptor.identifier().to_string(),
                existing: existing.type_name,
            });
        }

        let entry = Arc::new(TypeEntry::of::<T>(descriptor));
        inner.by_type.insert(entry.type_id, Arc::clone(&entry));
        inner
            .by_identifier
            .insert(entry.descriptor.identifier().to_string(), Arc::clone(&entry));
        debug!(
            "Registered {} as {}",
            entry.type_name,
            entry.descriptor.storage_path()
        );
        Ok((entry, true))
    }

    /// Looks up the entry for `T`.
    pub fn entry<T: PipelineData>(&self) -> PipelineResult<Arc<TypeEntry>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .by_type
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or(PipelineError::TypeNotRegistered(type_name::<T>()))
    }

    /// Looks up a type by its storage identifier.
    pub fn by_identifier(&self, identifier: &str) -> Option<Arc<TypeEntry>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_identifier.get(identifier).cloned()
    }

    /// Every registered type in one of the given classifiers, or every
    /// registered type when no classifier is given. Sorted by identifier.
    pub fn all_types(&self, classifiers: &[&str]) -> Vec<Arc<TypeEntry>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<_> = inner
            .by_identifier
            .values()
            .filter(|entry| {
                classifiers.is_empty() || classifiers.contains(&entry.descriptor.classifier())
            })
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.descriptor.identifier().cmp(b.descriptor.identifier()));
        entries
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_type
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
