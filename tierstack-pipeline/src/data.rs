//! Typed objects held by the pipeline.
//!
//! Applications implement [`PipelineData`] for each shared type. Inside the
//! pipeline every object is type-erased into a [`TypedObject`], which pairs
//! the value with its identity and a last-used timestamp.

use crate::error::{PipelineError, PipelineResult};
use crate::registry::TypeEntry;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::{type_name, Any};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tierstack_types::{DataDescriptor, LockKey, ObjectId};

/// A type whose objects are shared through the pipeline.
///
/// The serialized form must survive a round trip: every tier copy and every
/// replication block re-serializes the value without interpreting it. Fields
/// marked `#[serde(skip)]` are reset to their default whenever remote state
/// is applied.
pub trait PipelineData: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Builds a fresh object before any state is applied to it.
    fn instantiate(id: ObjectId) -> Self;

    /// Called once on the node that creates the object, before it is first
    /// stored.
    fn on_create(&mut self) {}

    /// Called after the object is pulled into the local tier from the
    /// distributed cache or storage.
    fn on_load(&mut self) {}

    /// Called after an update from another node was applied. `before` is the
    /// serialized state prior to the update.
    fn on_sync(&mut self, before: &Value) {
        let _ = before;
    }

    /// Called before the object is deleted.
    fn on_delete(&mut self) {}

    /// Called before the object is evicted from the local tier after being
    /// saved outward.
    fn on_cleanup(&mut self) {}
}

/// Object-safe view of a [`PipelineData`] value.
pub(crate) trait ErasedData: Any + Send + Sync {
    fn to_value(&self) -> serde_json::Result<Value>;
    fn apply_value(&mut self, value: Value) -> serde_json::Result<()>;
    fn fire_create(&mut self);
    fn fire_load(&mut self);
    fn fire_sync(&mut self, before: &Value);
    fn fire_delete(&mut self);
    fn fire_cleanup(&mut self);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: PipelineData> ErasedData for T {
    fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn apply_value(&mut self, value: Value) -> serde_json::Result<()> {
        *self = serde_json::from_value(value)?;
        Ok(())
    }

    fn fire_create(&mut self) {
        PipelineData::on_create(self);
    }

    fn fire_load(&mut self) {
        PipelineData::on_load(self);
    }

    fn fire_sync(&mut self, before: &Value) {
        PipelineData::on_sync(self, before);
    }

    fn fire_delete(&mut self) {
        PipelineData::on_delete(self);
    }

    fn fire_cleanup(&mut self) {
        PipelineData::on_cleanup(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Builds the erased form of a fresh `T`; stored in the registry as the
/// type's factory.
pub(crate) fn instantiate_erased<T: PipelineData>(id: ObjectId) -> Box<dyn ErasedData> {
    Box::new(T::instantiate(id))
}

/// One live object in the local tier.
pub struct TypedObject {
    entry: Arc<TypeEntry>,
    id: ObjectId,
    data: RwLock<Box<dyn ErasedData>>,
    born: Instant,
    /// Nanoseconds after `born` at which the object was last used.
    last_used: AtomicU64,
}

impl TypedObject {
    pub(crate) fn new(entry: Arc<TypeEntry>, id: ObjectId) -> Self {
        let data = entry.instantiate(id);
        Self {
            entry,
            id,
            data: RwLock::new(data),
            born: Instant::now(),
            last_used: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn descriptor(&self) -> &DataDescriptor {
        self.entry.descriptor()
    }

    pub fn key(&self) -> LockKey {
        self.entry.descriptor().lock_key(self.id)
    }

    pub(crate) fn entry(&self) -> &Arc<TypeEntry> {
        &self.entry
    }

    /// Returns the serialized form of the current state.
    pub fn serialize(&self) -> PipelineResult<Value> {
        Ok(self.to_value()?)
    }

    pub(crate) fn to_value(&self) -> serde_json::Result<Value> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        (**data).to_value()
    }

    /// Replaces the state with a serialized form.
    pub(crate) fn apply(&self, value: Value) -> serde_json::Result<()> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        (**data).apply_value(value)
    }

    /// Replaces the state with one received from another node and runs the
    /// post-sync hook.
    pub(crate) fn sync_from(&self, value: Value) -> serde_json::Result<()> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let before = (**data).to_value()?;
        (**data).apply_value(value)?;
        (**data).fire_sync(&before);
        Ok(())
    }

    /// Runs `f` against the erased value under the object's write lock.
    pub(crate) fn with_erased<R>(&self, f: impl FnOnce(&mut dyn ErasedData) -> R) -> R {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut **data)
    }

    /// Runs `f` against the value as a `T`.
    pub fn read_as<T: PipelineData, R>(&self, f: impl FnOnce(&T) -> R) -> PipelineResult<R> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        match (**data).as_any().downcast_ref::<T>() {
            Some(value) => Ok(f(value)),
            None => Err(self.mismatch::<T>()),
        }
    }

    /// Runs `f` against the value as a mutable `T`.
    pub fn write_as<T: PipelineData, R>(&self, f: impl FnOnce(&mut T) -> R) -> PipelineResult<R> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        match (**data).as_any_mut().downcast_mut::<T>() {
            Some(value) => Ok(f(value)),
            None => Err(self.mismatch::<T>()),
        }
    }

    fn mismatch<T>(&self) -> PipelineError {
        PipelineError::TypeMismatch {
            key: self.key(),
            expected: type_name::<T>(),
        }
    }

    /// Marks the object as used now.
    pub fn touch(&self) {
        let since_born = u64::try_from(self.born.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.last_used.fetch_max(since_born, Ordering::Relaxed);
    }

    /// When the object was last used, on the monotonic clock.
    pub fn last_used_at(&self) -> Instant {
        self.born + Duration::from_nanos(self.last_used.load(Ordering::Relaxed))
    }

    /// How long the object has gone unused.
    pub fn idle_for(&self) -> Duration {
        self.last_used_at().elapsed()
    }
}

impl fmt::Debug for TypedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedObject")
            .field("type", &self.entry.type_name())
            .field("key", &self.key())
            .field("idle_for", &self.idle_for())
            .finish()
    }
}
