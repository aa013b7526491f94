//! The typed entry point: load, create, delete and observe shared objects.

use crate::access::DataAccess;
use crate::builder::PipelineBuilder;
use crate::config::PipelineConfig;
use crate::engine::PipelineCore;
use crate::data::{PipelineData, TypedObject};
use crate::error::{PipelineError, PipelineResult};
use crate::local_cache::LocalCache;
use crate::reference::DataReference;
use crate::registry::{DataRegistry, TypeEntry};
use crate::subscriber::DataSubscriber;
use crate::synchronizer::Synchronizer;
use crate::tier_sync::TierSynchronizer;
use std::any::TypeId;
use std::sync::Arc;
use tierstack_types::{DataDescriptor, ObjectId, SessionId};
use tracing::{debug, warn};

/// How far [`Pipeline::load_with_strategy`] looks for an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadingStrategy {
    /// Only the local tier.
    LoadLocal,
    /// The local tier; on a miss, return `None` and hydrate in the
    /// background so a later call hits.
    LoadLocalElseLoad,
    /// Local, then distributed cache, then storage.
    #[default]
    LoadPipeline,
}

/// One node's view of the shared data.
///
/// Cheap to clone; every clone drives the same node.
#[derive(Clone)]
pub struct Pipeline {
    core: Arc<PipelineCore>,
}

impl Pipeline {
    pub(crate) fn from_core(core: Arc<PipelineCore>) -> Self {
        Self { core }
    }

    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// The id stamped on every replication block this node publishes.
    pub fn session_id(&self) -> SessionId {
        self.core.session
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.core.config
    }

    pub fn registry(&self) -> &DataRegistry {
        &self.core.registry
    }

    pub fn local_cache(&self) -> &LocalCache {
        &self.core.local
    }

    pub fn tier_synchronizer(&self) -> &TierSynchronizer {
        &self.core.tiers
    }

    /// The replication endpoint for `T`, if a transport is configured and
    /// `T` is registered.
    pub fn synchronizer<T: PipelineData>(&self) -> Option<Arc<Synchronizer>> {
        self.core.synchronizer(TypeId::of::<T>())
    }

    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    fn entry<T: PipelineData>(&self) -> PipelineResult<Arc<TypeEntry>> {
        self.core.ensure_running()?;
        self.core.registry.entry::<T>()
    }

    fn access<T: PipelineData>(&self, object: &TypedObject) -> PipelineResult<DataAccess<T>> {
        let entry = self.core.local.create_access(object.descriptor(), object.id())?;
        Ok(DataAccess::new(entry, Arc::clone(&self.core)))
    }

    // ── Registration ─────────────────────────────────────────────

    /// Registers `T` under `descriptor`. Registering the same type again with
    /// the same descriptor does nothing.
    pub async fn register_type<T: PipelineData>(
        &self,
        descriptor: DataDescriptor,
    ) -> PipelineResult<()> {
        self.core.ensure_running()?;
        let (entry, added) = self.core.registry.register::<T>(descriptor)?;
        if added {
            self.core.attach(&entry).await?;
        }
        Ok(())
    }

    // ── Loading ──────────────────────────────────────────────────

    /// Looks the object up through every tier. Returns `None` if no tier
    /// holds it.
    pub async fn load<T: PipelineData>(&self, id: ObjectId) -> PipelineResult<Option<DataAccess<T>>> {
        self.load_with_strategy(id, LoadingStrategy::LoadPipeline).await
    }

    pub async fn load_with_strategy<T: PipelineData>(
        &self,
        id: ObjectId,
        strategy: LoadingStrategy,
    ) -> PipelineResult<Option<DataAccess<T>>> {
        let entry = self.entry::<T>()?;
        let object = match strategy {
            LoadingStrategy::LoadPipeline => self.core.load(&entry, id).await?,
            LoadingStrategy::LoadLocal => self.core.local.get(entry.descriptor(), id),
            LoadingStrategy::LoadLocalElseLoad => {
                let object = self.core.local.get(entry.descriptor(), id);
                if object.is_none() {
                    self.load_in_background(entry, id);
                }
                object
            }
        };
        object.map(|object| self.access(&object)).transpose()
    }

    fn load_in_background(&self, entry: Arc<TypeEntry>, id: ObjectId) {
        let core = Arc::clone(&self.core);
        tokio::spawn(async move {
            match core.load(&entry, id).await {
                Ok(Some(_)) => debug!("Loaded {} in the background", entry.descriptor().lock_key(id)),
                Ok(None) => {}
                Err(e) => warn!(
                    "Background load of {} failed: {e}",
                    entry.descriptor().lock_key(id)
                ),
            }
        });
    }

    /// Like [`load`](Self::load), but a missing object is an error.
    pub async fn require<T: PipelineData>(&self, id: ObjectId) -> PipelineResult<DataAccess<T>> {
        match self.load::<T>(id).await? {
            Some(access) => Ok(access),
            None => Err(PipelineError::NotFound {
                key: self.entry::<T>()?.descriptor().lock_key(id),
            }),
        }
    }

    /// Loads the object, creating it if no tier holds it.
    pub async fn load_or_create<T: PipelineData>(&self, id: ObjectId) -> PipelineResult<DataAccess<T>> {
        self.load_or_create_with(id, |_: &mut T| {}).await
    }

    /// Loads the object, or creates it and runs `init` on the fresh instance
    /// before its creation hook. `init` never runs on an existing object.
    pub async fn load_or_create_with<T, F>(&self, id: ObjectId, init: F) -> PipelineResult<DataAccess<T>>
    where
        T: PipelineData,
        F: FnOnce(&mut T) + Send,
    {
        let entry = self.entry::<T>()?;
        if let Some(object) = self.core.load(&entry, id).await? {
            return self.access(&object);
        }

        let key = entry.descriptor().lock_key(id);
        let _guard = self.core.locks.write_lock(&key).acquire().await?;
        // Someone may have created it while we waited for the lock.
        if let Some(object) = self.core.hydrate(&entry, id).await? {
            return self.access(&object);
        }

        let object = self.core.local.instantiate(&entry, id);
        object.write_as::<T, _>(init)?;
        self.core.publish_creation(&object).await?;
        self.access(&object)
    }

    /// Returns true if any tier holds the object.
    pub async fn exist<T: PipelineData>(&self, id: ObjectId) -> PipelineResult<bool> {
        let entry = self.entry::<T>()?;
        self.core.exist(&entry, id).await
    }

    /// Deletes the object from every tier and from every other node.
    /// Fails with [`PipelineError::NotFound`] if no tier holds it.
    pub async fn delete<T: PipelineData>(&self, id: ObjectId) -> PipelineResult<()> {
        let entry = self.entry::<T>()?;
        self.core.delete(&entry, id).await
    }

    /// Pulls every stored and cached object of type `T` into the local tier
    /// and returns access to all of them.
    pub async fn load_all<T: PipelineData>(&self) -> PipelineResult<Vec<DataAccess<T>>> {
        let entry = self.entry::<T>()?;
        let mut ids: Vec<_> = self.core.load_all(&entry).await?.into_iter().collect();
        ids.sort();

        let mut accesses = Vec::with_capacity(ids.len());
        for id in ids {
            // Skip objects deleted in the meantime.
            if let Some(object) = self.core.local.peek(entry.descriptor(), id) {
                accesses.push(self.access(&object)?);
            }
        }
        Ok(accesses)
    }

    /// Follows a reference to the object it points at.
    pub async fn resolve<T: PipelineData>(
        &self,
        reference: &DataReference<T>,
    ) -> PipelineResult<Option<DataAccess<T>>> {
        let entry = self.entry::<T>()?;
        if reference.identifier() != entry.descriptor().identifier() {
            return Err(PipelineError::TypeMismatch {
                key: entry.descriptor().lock_key(reference.id()),
                expected: entry.type_name(),
            });
        }
        self.load(reference.id()).await
    }

    // ── Subscribers ──────────────────────────────────────────────

    /// Attaches `subscriber` to the object. If the object is resident, the
    /// subscriber receives its current value immediately. A subscriber is
    /// attached to at most one object; subscribing again moves it.
    pub fn subscribe<T, V>(&self, subscriber: &DataSubscriber<T, V>, id: ObjectId) -> PipelineResult<()>
    where
        T: PipelineData,
        V: Clone + Send + 'static,
    {
        let entry = self.entry::<T>()?;
        self.core
            .local
            .subscribe(entry.descriptor().lock_key(id), subscriber.slot());
        Ok(())
    }

    /// Detaches `subscriber`. Returns false if it was not attached.
    pub fn unsubscribe<T, V>(&self, subscriber: &DataSubscriber<T, V>) -> bool
    where
        T: PipelineData,
        V: Clone + Send + 'static,
    {
        self.core.local.unsubscribe(subscriber.id())
    }

    // ── Bulk operations ──────────────────────────────────────────

    /// Pushes every resident object to the distributed cache and storage,
    /// then evicts it from the local tier. Each object is saved under its
    /// write lock, so this waits for open write handles to commit. Objects
    /// that fail to save stay resident and the first failure is returned.
    /// Returns how many objects were saved.
    pub async fn save_all(&self) -> PipelineResult<usize> {
        self.core.ensure_running()?;
        self.core.save_resident(true).await
    }

    /// Like [`save_all`](Self::save_all) but keeps everything resident.
    pub async fn flush_all(&self) -> PipelineResult<usize> {
        self.core.ensure_running()?;
        self.core.save_resident(false).await
    }

    /// Pulls every object of every `LoadBefore` type into the local tier.
    /// Returns how many objects were loaded.
    pub async fn preload_all(&self) -> PipelineResult<usize> {
        self.core.ensure_running()?;
        self.core.preload_all().await
    }

    /// Saves and evicts objects that have been idle for longer than their
    /// type's idle timeout. Returns how many were evicted.
    pub async fn evict_idle(&self) -> PipelineResult<usize> {
        self.core.ensure_running()?;
        self.core.evict_idle().await
    }

    /// Saves everything, stops replication and background work. Later calls
    /// fail with [`PipelineError::ShutDown`]; calling this again does
    /// nothing.
    pub async fn shutdown(&self) -> PipelineResult<()> {
        self.core.shutdown().await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("node", &self.core.config.node_name)
            .field("session", &self.core.session)
            .field("types", &self.core.registry.len())
            .field("resident", &self.core.local.len())
            .finish()
    }
}
