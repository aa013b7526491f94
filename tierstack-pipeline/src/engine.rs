//! Untyped orchestration shared by the [`Pipeline`](crate::Pipeline) facade
//! and the access handles.

use crate::config::PipelineConfig;
use crate::data::TypedObject;
use crate::error::{PipelineError, PipelineResult};
use crate::local_cache::LocalCache;
use crate::registry::{DataRegistry, TypeEntry};
use crate::synchronizer::{BlockApplier, Synchronizer};
use crate::tier_sync::TierSynchronizer;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tierstack_sync::{NetworkLockService, ReplicationTransport};
use tierstack_types::{DataDescriptor, ObjectId, PreloadStrategy, SessionId, Tier};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The tiers beyond the local one, in lookup order.
const OUTER_TIERS: [Tier; 2] = [Tier::DistributedCache, Tier::Storage];

pub(crate) struct PipelineCore {
    pub(crate) session: SessionId,
    pub(crate) config: PipelineConfig,
    pub(crate) registry: Arc<DataRegistry>,
    pub(crate) local: Arc<LocalCache>,
    pub(crate) tiers: TierSynchronizer,
    pub(crate) locks: Arc<dyn NetworkLockService>,
    transport: Option<Arc<dyn ReplicationTransport>>,
    synchronizers: RwLock<HashMap<TypeId, Arc<Synchronizer>>>,
    running: AtomicBool,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl PipelineCore {
    pub(crate) fn new(
        session: SessionId,
        config: PipelineConfig,
        registry: Arc<DataRegistry>,
        local: Arc<LocalCache>,
        tiers: TierSynchronizer,
        locks: Arc<dyn NetworkLockService>,
        transport: Option<Arc<dyn ReplicationTransport>>,
    ) -> Self {
        Self {
            session,
            config,
            registry,
            local,
            tiers,
            locks,
            transport,
            synchronizers: RwLock::new(HashMap::new()),
            running: AtomicBool::new(true),
            maintenance: Mutex::new(None),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_running(&self) -> PipelineResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(PipelineError::ShutDown)
        }
    }

    pub(crate) fn set_maintenance(&self, handle: JoinHandle<()>) {
        *self.maintenance.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub(crate) fn synchronizer(&self, type_id: TypeId) -> Option<Arc<Synchronizer>> {
        self.synchronizers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&type_id)
            .cloned()
    }

    // ── Registration ─────────────────────────────────────────────

    /// Wires up replication for a newly registered type and preloads it if
    /// requested.
    pub(crate) async fn attach(&self, entry: &Arc<TypeEntry>) -> PipelineResult<()> {
        if let Some(transport) = &self.transport {
            let synchronizer = Arc::new(Synchronizer::new(
                Arc::clone(entry),
                self.session,
                Arc::clone(transport),
            ));
            let applier = Arc::new(BlockApplier::new(
                Arc::clone(entry),
                self.session,
                Arc::clone(&self.local),
                Arc::clone(&self.locks),
                self.tiers.cache_provider(),
            ));
            synchronizer.start(applier).await?;
            self.synchronizers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(entry.type_id(), synchronizer);
        }
        info!(
            "Registered {} as {} ({:?}, {:?})",
            entry.type_name(),
            entry.descriptor().storage_path(),
            entry.descriptor().context(),
            entry.descriptor().preload()
        );

        if entry.descriptor().preload() == PreloadStrategy::LoadBefore
            && self.config.preload_on_register
        {
            self.preload_type(entry).await?;
        }
        Ok(())
    }

    // ── Lookup chain ─────────────────────────────────────────────

    /// Local hit, otherwise the full chain under the read lock.
    pub(crate) async fn load(
        &self,
        entry: &Arc<TypeEntry>,
        id: ObjectId,
    ) -> PipelineResult<Option<Arc<TypedObject>>> {
        let descriptor = entry.descriptor();
        if let Some(object) = self.local.get(descriptor, id) {
            return Ok(Some(object));
        }
        let _guard = self.locks.read_lock(&descriptor.lock_key(id)).acquire().await?;
        self.hydrate(entry, id).await
    }

    /// Local, then distributed cache, then storage. The caller holds the
    /// object's lock.
    pub(crate) async fn hydrate(
        &self,
        entry: &Arc<TypeEntry>,
        id: ObjectId,
    ) -> PipelineResult<Option<Arc<TypedObject>>> {
        let descriptor = entry.descriptor();
        if let Some(object) = self.local.get(descriptor, id) {
            return Ok(Some(object));
        }
        for tier in OUTER_TIERS {
            if self.tiers.copy(tier, Tier::Local, descriptor, id).await? {
                if let Some(object) = self.local.get(descriptor, id) {
                    object.with_erased(|data| data.fire_load());
                    debug!("Loaded {} from {tier}", object.key());
                    return Ok(Some(object));
                }
            }
        }
        Ok(None)
    }

    /// Stores a freshly instantiated object in every tier its context allows
    /// and announces it. The caller holds the object's write lock.
    pub(crate) async fn publish_creation(&self, object: &Arc<TypedObject>) -> PipelineResult<()> {
        let descriptor = object.descriptor();
        let id = object.id();
        object.with_erased(|data| data.fire_create());
        self.local.put(Arc::clone(object));
        self.tiers
            .copy(Tier::Local, Tier::DistributedCache, descriptor, id)
            .await?;
        self.tiers.copy(Tier::Local, Tier::Storage, descriptor, id).await?;
        if let Some(synchronizer) = self.synchronizer(object.entry().type_id()) {
            synchronizer.push_creation(object).await?;
        }
        info!("Created {}", object.key());
        Ok(())
    }

    /// True if any available tier holds the object.
    pub(crate) async fn exist(&self, entry: &Arc<TypeEntry>, id: ObjectId) -> PipelineResult<bool> {
        let descriptor = entry.descriptor();
        if self.local.exists(descriptor, id) {
            return Ok(true);
        }
        let _guard = self.locks.read_lock(&descriptor.lock_key(id)).acquire().await?;
        if self.local.exists(descriptor, id) {
            return Ok(true);
        }
        for tier in OUTER_TIERS {
            if self.tiers.exists_in(tier, descriptor, id).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Deletes the object everywhere and announces the removal.
    pub(crate) async fn delete(&self, entry: &Arc<TypeEntry>, id: ObjectId) -> PipelineResult<()> {
        let descriptor = entry.descriptor();
        let key = descriptor.lock_key(id);
        let _guard = self.locks.write_lock(&key).acquire().await?;

        if !self.local.exists(descriptor, id) && self.hydrate(entry, id).await?.is_none() {
            return Err(PipelineError::NotFound { key });
        }
        if !self.local.remove(descriptor, id) {
            return Err(PipelineError::NotFound { key });
        }
        for tier in OUTER_TIERS {
            if self.tiers.exists_in(tier, descriptor, id).await? {
                self.tiers.remove_from(tier, descriptor, id).await?;
            }
        }
        if let Some(synchronizer) = self.synchronizer(entry.type_id()) {
            synchronizer.push_removal(id).await?;
        }
        info!("Deleted {key}");
        Ok(())
    }

    /// Pulls every object of the type known to the outer tiers into the
    /// local tier and returns the resident ids.
    pub(crate) async fn load_all(&self, entry: &Arc<TypeEntry>) -> PipelineResult<HashSet<ObjectId>> {
        let descriptor = entry.descriptor();
        let mut ids = self.tiers.list_ids(Tier::Storage, descriptor).await?;
        ids.extend(self.tiers.list_ids(Tier::DistributedCache, descriptor).await?);

        for id in ids {
            if self.local.exists(descriptor, id) {
                continue;
            }
            let _guard = self.locks.read_lock(&descriptor.lock_key(id)).acquire().await?;
            self.hydrate(entry, id).await?;
        }
        Ok(self.local.ids(descriptor))
    }

    // ── Handles ──────────────────────────────────────────────────

    /// Publishes a mutated object. The caller holds its write lock.
    pub(crate) async fn commit(&self, object: &TypedObject, persist: bool) -> PipelineResult<()> {
        let key = object.key();
        if !self.local.contains_key(&key) {
            return Err(PipelineError::AccessInvalid { key });
        }
        let descriptor = object.descriptor();
        self.tiers
            .copy(Tier::Local, Tier::DistributedCache, descriptor, object.id())
            .await?;
        if persist {
            self.tiers
                .copy(Tier::Local, Tier::Storage, descriptor, object.id())
                .await?;
        }
        if let Some(synchronizer) = self.synchronizer(object.entry().type_id()) {
            synchronizer.push_update(object).await?;
        }
        self.local.notify_subscribers(object);
        object.touch();
        debug!("Committed {key} (persist: {persist})");
        Ok(())
    }

    /// Brings the local copy up to the distributed cache's state, discarding
    /// any uncommitted local change. The caller holds the object's write
    /// lock.
    pub(crate) async fn refresh_from_cache(&self, object: &TypedObject) -> PipelineResult<()> {
        let descriptor = object.descriptor();
        let Some(latest) = self
            .tiers
            .load_from(Tier::DistributedCache, descriptor, object.id())
            .await?
        else {
            return Ok(());
        };
        if latest == object.serialize()? {
            return Ok(());
        }
        object.apply(latest)?;
        self.local.notify_subscribers(object);
        debug!("Refreshed {} from the distributed cache", object.key());
        Ok(())
    }

    // ── Bulk operations ──────────────────────────────────────────

    async fn push_outward(&self, descriptor: &DataDescriptor, id: ObjectId) -> PipelineResult<()> {
        self.tiers
            .copy(Tier::Local, Tier::DistributedCache, descriptor, id)
            .await?;
        self.tiers.copy(Tier::Local, Tier::Storage, descriptor, id).await?;
        Ok(())
    }

    /// Saves one resident object under its write lock, after refreshing it
    /// from the distributed cache. Returns false if the object left the
    /// local tier while we waited.
    async fn save_one(
        &self,
        descriptor: &DataDescriptor,
        id: ObjectId,
        evict: bool,
    ) -> PipelineResult<bool> {
        let _guard = self.locks.write_lock(&descriptor.lock_key(id)).acquire().await?;
        let Some(object) = self.local.peek(descriptor, id) else {
            return Ok(false);
        };
        self.refresh_from_cache(&object).await?;
        self.push_outward(descriptor, id).await?;
        if evict {
            self.local.evict(descriptor, id);
        }
        Ok(true)
    }

    /// Saves every resident object outward, optionally evicting it
    /// afterwards. Objects that fail to save stay resident; the first failure
    /// is returned once every object has been tried.
    pub(crate) async fn save_resident(&self, evict: bool) -> PipelineResult<usize> {
        let mut saved = 0;
        let mut first_error = None;
        for entry in self.registry.all_types(&[]) {
            let descriptor = entry.descriptor();
            for id in self.local.ids(descriptor) {
                match self.save_one(descriptor, id, evict).await {
                    Ok(true) => saved += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Could not save {} [{id}]: {e}", descriptor.identifier());
                        first_error.get_or_insert(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(saved),
        }
    }

    pub(crate) async fn preload_all(&self) -> PipelineResult<usize> {
        let mut loaded = 0;
        for entry in self.registry.all_types(&[]) {
            if entry.descriptor().preload() == PreloadStrategy::LoadBefore {
                loaded += self.preload_type(&entry).await?;
            }
        }
        Ok(loaded)
    }

    /// Pulls every cached, then every stored object of a type into the local
    /// tier. Ids taken from the cache are not pulled from storage again.
    async fn preload_type(&self, entry: &Arc<TypeEntry>) -> PipelineResult<usize> {
        let descriptor = entry.descriptor();
        let mut seen = HashSet::new();
        let mut loaded = 0;

        for tier in OUTER_TIERS {
            for id in self.tiers.list_ids(tier, descriptor).await? {
                if !seen.insert(id) || self.local.exists(descriptor, id) {
                    continue;
                }
                if self.tiers.copy(tier, Tier::Local, descriptor, id).await? {
                    if let Some(object) = self.local.peek(descriptor, id) {
                        object.with_erased(|data| data.fire_load());
                    }
                    loaded += 1;
                }
            }
        }
        if loaded > 0 {
            info!("Preloaded {loaded} {} object(s)", descriptor.identifier());
        }
        Ok(loaded)
    }

    /// Saves and evicts objects unused for longer than their type's idle
    /// timeout. Observed objects, and objects of types with nowhere to be
    /// saved to, stay resident.
    pub(crate) async fn evict_idle(&self) -> PipelineResult<usize> {
        let mut evicted = 0;
        for entry in self.registry.all_types(&[]) {
            let descriptor = entry.descriptor();
            let Some(timeout) = descriptor.idle_timeout() else {
                continue;
            };
            if !OUTER_TIERS
                .iter()
                .any(|tier| self.tiers.is_available(*tier, descriptor))
            {
                continue;
            }

            for object in self.local.objects(descriptor) {
                let key = object.key();
                if object.idle_for() < timeout || self.local.has_subscribers(&key) {
                    continue;
                }
                let _guard = self.locks.write_lock(&key).acquire().await?;
                if object.idle_for() < timeout || !self.local.contains_key(&key) {
                    continue;
                }
                self.refresh_from_cache(&object).await?;
                self.push_outward(descriptor, object.id()).await?;
                if self.local.evict(descriptor, object.id()) {
                    debug!("Evicted idle {key}");
                    evicted += 1;
                }
            }
        }
        Ok(evicted)
    }

    /// Stops background work, saves every resident object and stops
    /// listening for replication.
    pub(crate) async fn shutdown(&self) -> PipelineResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Pipeline {} already shut down", self.config.node_name);
            return Ok(());
        }
        let maintenance = self
            .maintenance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = maintenance {
            handle.abort();
        }

        let saved = self.save_resident(true).await;

        let synchronizers: Vec<_> = self
            .synchronizers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for synchronizer in synchronizers {
            if let Err(e) = synchronizer.stop().await {
                warn!("Could not stop replication on {}: {e}", synchronizer.topic());
            }
        }

        let saved = saved?;
        info!(
            "Pipeline {} shut down after saving {saved} object(s)",
            self.config.node_name
        );
        Ok(())
    }
}
