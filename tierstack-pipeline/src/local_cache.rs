//! The node's working set of live objects.
//!
//! Structural changes (insert, remove) take the cache's write lock; lookups
//! take its read lock. Content changes to a single object are guarded
//! separately by that object's network lock, obtained through
//! [`DataAccess`](crate::DataAccess).

use crate::access::AccessEntry;
use crate::data::TypedObject;
use crate::error::{PipelineError, PipelineResult};
use crate::registry::{DataRegistry, TypeEntry};
use crate::subscriber::{SubscriberId, SubscriberSlot};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tierstack_storage::{DataProvider, StorageError, StorageResult};
use tierstack_sync::NetworkLockService;
use tierstack_types::{DataDescriptor, LockKey, ObjectId};
use tracing::{debug, trace};

#[derive(Default)]
struct CacheState {
    objects: HashMap<String, HashMap<ObjectId, Arc<TypedObject>>>,
    accesses: HashMap<LockKey, Arc<AccessEntry>>,
}

impl CacheState {
    fn object(&self, identifier: &str, id: ObjectId) -> Option<&Arc<TypedObject>> {
        self.objects.get(identifier).and_then(|objects| objects.get(&id))
    }

    fn take(&mut self, descriptor: &DataDescriptor, id: ObjectId) -> Option<Arc<TypedObject>> {
        let removed = self
            .objects
            .get_mut(descriptor.identifier())
            .and_then(|objects| objects.remove(&id));
        if let Some(access) = self.accesses.remove(&descriptor.lock_key(id)) {
            access.invalidate();
        }
        removed
    }
}

/// In-process tier holding live [`TypedObject`]s.
pub struct LocalCache {
    registry: Arc<DataRegistry>,
    locks: Arc<dyn NetworkLockService>,
    state: RwLock<CacheState>,
    subscribers: Mutex<HashMap<LockKey, Vec<Arc<dyn SubscriberSlot>>>>,
}

impl LocalCache {
    pub fn new(registry: Arc<DataRegistry>, locks: Arc<dyn NetworkLockService>) -> Self {
        Self {
            registry,
            locks,
            state: RwLock::new(CacheState::default()),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    pub fn exists(&self, descriptor: &DataDescriptor, id: ObjectId) -> bool {
        self.peek(descriptor, id).is_some()
    }

    pub fn contains_key(&self, key: &LockKey) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.object(key.identifier(), key.id()).is_some()
    }

    /// Returns the object and marks it used.
    pub fn get(&self, descriptor: &DataDescriptor, id: ObjectId) -> Option<Arc<TypedObject>> {
        let object = self.peek(descriptor, id)?;
        object.touch();
        Some(object)
    }

    /// Returns the object without marking it used.
    pub fn peek(&self, descriptor: &DataDescriptor, id: ObjectId) -> Option<Arc<TypedObject>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.object(descriptor.identifier(), id).cloned()
    }

    pub(crate) fn lookup(&self, key: &LockKey) -> Option<Arc<TypedObject>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let object = state.object(key.identifier(), key.id()).cloned()?;
        object.touch();
        Some(object)
    }

    /// Ids of every resident object of a type.
    pub fn ids(&self, descriptor: &DataDescriptor) -> HashSet<ObjectId> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .objects
            .get(descriptor.identifier())
            .map(|objects| objects.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Every resident object of a type.
    pub fn objects(&self, descriptor: &DataDescriptor) -> Vec<Arc<TypedObject>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .objects
            .get(descriptor.identifier())
            .map(|objects| objects.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of resident objects across every type.
    pub fn len(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.objects.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts the object, replacing any previous one with the same key, and
    /// notifies its subscribers.
    pub fn put(&self, object: Arc<TypedObject>) {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state
                .objects
                .entry(object.descriptor().identifier().to_string())
                .or_default()
                .insert(object.id(), Arc::clone(&object));
        }
        object.touch();
        trace!("Stored {} in local cache", object.key());
        self.notify_subscribers(&object);
    }

    /// Deletes the object: runs its deletion hook, invalidates its cached
    /// access and detaches its subscribers. Returns false if it was absent.
    pub fn remove(&self, descriptor: &DataDescriptor, id: ObjectId) -> bool {
        let removed = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.take(descriptor, id)
        };
        let Some(object) = removed else {
            return false;
        };
        object.with_erased(|data| data.fire_delete());

        let detached = {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            subscribers.remove(&object.key()).unwrap_or_default()
        };
        for slot in detached {
            slot.link(None);
        }
        debug!("Removed {} from local cache", object.key());
        true
    }

    /// Drops the object from memory after it was saved outward. Subscribers
    /// stay attached and see the object again once it is reloaded.
    pub(crate) fn evict(&self, descriptor: &DataDescriptor, id: ObjectId) -> bool {
        let removed = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.take(descriptor, id)
        };
        match removed {
            Some(object) => {
                object.with_erased(|data| data.fire_cleanup());
                trace!("Evicted {} from local cache", object.key());
                true
            }
            None => false,
        }
    }

    /// Returns the resident object, or a fresh one that is not inserted.
    pub(crate) fn instantiate(&self, entry: &Arc<TypeEntry>, id: ObjectId) -> Arc<TypedObject> {
        self.peek(entry.descriptor(), id)
            .unwrap_or_else(|| Arc::new(TypedObject::new(Arc::clone(entry), id)))
    }

    /// Applies a serialized state to the object (instantiating it if needed)
    /// and stores it.
    pub(crate) fn materialize(
        &self,
        entry: &Arc<TypeEntry>,
        id: ObjectId,
        state: Value,
    ) -> serde_json::Result<Arc<TypedObject>> {
        let object = self.instantiate(entry, id);
        object.apply(state)?;
        self.put(Arc::clone(&object));
        Ok(object)
    }

    /// Returns the cached access for a resident object, creating it on first
    /// use.
    pub fn create_access(
        &self,
        descriptor: &DataDescriptor,
        id: ObjectId,
    ) -> PipelineResult<Arc<AccessEntry>> {
        let key = descriptor.lock_key(id);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.object(descriptor.identifier(), id).is_none() {
            return Err(PipelineError::NotFound { key });
        }
        let access = state.accesses.entry(key.clone()).or_insert_with(|| {
            Arc::new(AccessEntry::new(
                key.clone(),
                self.locks.read_lock(&key),
                self.locks.write_lock(&key),
            ))
        });
        Ok(Arc::clone(access))
    }

    /// Attaches a subscriber and delivers the current value if the object is
    /// resident.
    pub(crate) fn subscribe(&self, key: LockKey, slot: Arc<dyn SubscriberSlot>) {
        self.unsubscribe(slot.id());
        slot.link(Some(key.clone()));
        {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            subscribers.entry(key.clone()).or_default().push(Arc::clone(&slot));
        }
        let resident = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            state.object(key.identifier(), key.id()).cloned()
        };
        if let Some(object) = resident {
            slot.deliver(&object);
        }
    }

    /// Detaches a subscriber. Returns false if it was not attached.
    pub(crate) fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut found = None;
        for (key, slots) in subscribers.iter_mut() {
            if let Some(pos) = slots.iter().position(|slot| slot.id() == id) {
                found = Some((key.clone(), slots.remove(pos)));
                break;
            }
        }
        let Some((key, slot)) = found else {
            return false;
        };
        if subscribers.get(&key).is_some_and(Vec::is_empty) {
            subscribers.remove(&key);
        }
        drop(subscribers);
        slot.link(None);
        true
    }

    pub fn has_subscribers(&self, key: &LockKey) -> bool {
        let subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.get(key).is_some_and(|slots| !slots.is_empty())
    }

    /// Delivers the object's current state to every subscriber attached to it.
    pub fn notify_subscribers(&self, object: &TypedObject) {
        let slots = {
            let subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            match subscribers.get(&object.key()) {
                Some(slots) => slots.clone(),
                None => return,
            }
        };
        for slot in slots {
            slot.deliver(object);
        }
    }
}

/// The local tier as seen by the tier synchronizer. Reads do not count as
/// use, so background flushes never keep idle objects alive.
#[async_trait]
impl DataProvider for LocalCache {
    fn name(&self) -> &str {
        "local"
    }

    async fn exists(&self, descriptor: &DataDescriptor, id: ObjectId) -> StorageResult<bool> {
        Ok(LocalCache::exists(self, descriptor, id))
    }

    async fn load_serialized(
        &self,
        descriptor: &DataDescriptor,
        id: ObjectId,
    ) -> StorageResult<Option<Value>> {
        match self.peek(descriptor, id) {
            Some(object) => Ok(Some(object.to_value()?)),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        descriptor: &DataDescriptor,
        id: ObjectId,
        data: Value,
    ) -> StorageResult<()> {
        let entry = self.registry.by_identifier(descriptor.identifier()).ok_or_else(|| {
            StorageError::InvalidData(format!("{} is not registered", descriptor.identifier()))
        })?;
        self.materialize(&entry, id, data)?;
        Ok(())
    }

    async fn remove(&self, descriptor: &DataDescriptor, id: ObjectId) -> StorageResult<bool> {
        Ok(LocalCache::remove(self, descriptor, id))
    }

    async fn list_ids(&self, descriptor: &DataDescriptor) -> StorageResult<HashSet<ObjectId>> {
        Ok(self.ids(descriptor))
    }
}
