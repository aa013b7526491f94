//! Lock-guarded handles for reading and writing one object.

use crate::engine::PipelineCore;
use crate::data::{PipelineData, TypedObject};
use crate::error::{PipelineError, PipelineResult};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tierstack_sync::{LockGuard, NetworkLock};
use tierstack_types::{LockKey, ObjectId};

/// The per-node state shared by every [`DataAccess`] for one key: the two
/// sides of its network lock and whether the object is still resident.
pub struct AccessEntry {
    key: LockKey,
    read_lock: Arc<dyn NetworkLock>,
    write_lock: Arc<dyn NetworkLock>,
    valid: AtomicBool,
}

impl AccessEntry {
    pub(crate) fn new(
        key: LockKey,
        read_lock: Arc<dyn NetworkLock>,
        write_lock: Arc<dyn NetworkLock>,
    ) -> Self {
        Self {
            key,
            read_lock,
            write_lock,
            valid: AtomicBool::new(true),
        }
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    pub(crate) fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for AccessEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessEntry")
            .field("key", &self.key)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Access to one object of type `T`.
///
/// Once the object leaves the local tier (deleted here, deleted on another
/// node, or evicted) every later [`read`](Self::read) or
/// [`write`](Self::write) fails with [`PipelineError::AccessInvalid`].
///
/// Handles are not reentrant: do not open a second handle on the same
/// object while a write handle on it is alive in the same task.
pub struct DataAccess<T> {
    entry: Arc<AccessEntry>,
    core: Arc<PipelineCore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: PipelineData> DataAccess<T> {
    pub(crate) fn new(entry: Arc<AccessEntry>, core: Arc<PipelineCore>) -> Self {
        Self {
            entry,
            core,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.entry.key.id()
    }

    pub fn key(&self) -> &LockKey {
        &self.entry.key
    }

    /// Returns true while the object is resident in the local tier.
    pub fn is_valid(&self) -> bool {
        self.entry.is_valid() && self.core.local.contains_key(&self.entry.key)
    }

    fn resident(&self) -> PipelineResult<Arc<TypedObject>> {
        let invalid = || PipelineError::AccessInvalid {
            key: self.entry.key.clone(),
        };
        if !self.entry.is_valid() {
            return Err(invalid());
        }
        self.core.local.lookup(&self.entry.key).ok_or_else(invalid)
    }

    /// Waits for the read lock and returns a shared handle.
    pub async fn read(&self) -> PipelineResult<ReadHandle<T>> {
        self.resident()?;
        let guard = self.entry.read_lock.acquire().await?;
        // The object may have gone while we waited.
        let object = self.resident()?;
        Ok(ReadHandle {
            object,
            _guard: guard,
            _marker: PhantomData,
        })
    }

    /// Waits for the write lock and returns an exclusive handle holding the
    /// latest committed state.
    pub async fn write(&self) -> PipelineResult<WriteHandle<T>> {
        self.resident()?;
        let guard = self.entry.write_lock.acquire().await?;
        let object = self.resident()?;
        self.core.refresh_from_cache(&object).await?;
        Ok(WriteHandle {
            object,
            core: Arc::clone(&self.core),
            _guard: guard,
            _marker: PhantomData,
        })
    }

    /// Opens a write handle, applies `f` and commits.
    pub async fn update<R, F>(&self, persist_to_storage: bool, f: F) -> PipelineResult<R>
    where
        F: FnOnce(&mut T) -> R + Send,
        R: Send,
    {
        let handle = self.write().await?;
        let result = handle.with_mut(f)?;
        handle.commit(persist_to_storage).await?;
        Ok(result)
    }
}

impl<T> Clone for DataAccess<T> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
            core: Arc::clone(&self.core),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for DataAccess<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataAccess").field("entry", &self.entry).finish()
    }
}

/// Shared view of one object. Holds the read lock until dropped.
pub struct ReadHandle<T> {
    object: Arc<TypedObject>,
    _guard: LockGuard,
    _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for ReadHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadHandle").field("id", &self.object.id()).finish_non_exhaustive()
    }
}

impl<T: PipelineData> ReadHandle<T> {
    pub fn id(&self) -> ObjectId {
        self.object.id()
    }

    /// Runs `f` against the current state.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> PipelineResult<R> {
        self.object.read_as(f)
    }

    /// Returns a copy of the current state.
    pub fn get(&self) -> PipelineResult<T>
    where
        T: Clone,
    {
        self.with(T::clone)
    }
}

/// Exclusive view of one object. Holds the write lock until committed or
/// dropped; dropping without [`commit`](Self::commit) leaves local changes
/// unpublished.
pub struct WriteHandle<T> {
    object: Arc<TypedObject>,
    core: Arc<PipelineCore>,
    _guard: LockGuard,
    _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for WriteHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteHandle").field("id", &self.object.id()).finish_non_exhaustive()
    }
}

impl<T: PipelineData> WriteHandle<T> {
    pub fn id(&self) -> ObjectId {
        self.object.id()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> PipelineResult<R> {
        self.object.read_as(f)
    }

    pub fn get(&self) -> PipelineResult<T>
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Mutates the local state. Other nodes see the change after
    /// [`commit`](Self::commit).
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> PipelineResult<R> {
        self.object.write_as(f)
    }

    /// Pushes the state to the distributed cache (and storage when
    /// `persist_to_storage` is set), replicates it to other nodes, notifies
    /// local subscribers and releases the lock.
    pub async fn commit(self, persist_to_storage: bool) -> PipelineResult<()> {
        self.core.commit(&self.object, persist_to_storage).await
    }
}
