//! Per-type replication: outbound blocks for local changes, inbound blocks
//! applied to the local cache.

use crate::data::TypedObject;
use crate::error::{PipelineError, PipelineResult};
use crate::local_cache::LocalCache;
use crate::registry::TypeEntry;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tierstack_storage::DataProvider;
use tierstack_sync::{
    BlockListener, NetworkLockService, ReplicationBlock, ReplicationChannel,
    ReplicationTransport, SubscriptionId,
};
use tierstack_types::{ObjectId, SessionId};
use tracing::{debug, trace, warn};

/// Publishes this node's changes to one type's replication topic.
pub struct Synchronizer {
    entry: Arc<TypeEntry>,
    session: SessionId,
    channel: ReplicationChannel,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl Synchronizer {
    pub(crate) fn new(
        entry: Arc<TypeEntry>,
        session: SessionId,
        transport: Arc<dyn ReplicationTransport>,
    ) -> Self {
        let channel = ReplicationChannel::new(entry.descriptor().replication_topic(), transport);
        Self {
            entry,
            session,
            channel,
            subscription: Mutex::new(None),
        }
    }

    pub fn topic(&self) -> &str {
        self.channel.topic()
    }

    pub fn is_listening(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Starts applying inbound blocks.
    pub(crate) async fn start(&self, applier: Arc<BlockApplier>) -> PipelineResult<()> {
        let subscription = self.channel.subscribe(applier).await?;
        *self.subscription.lock().unwrap_or_else(PoisonError::into_inner) = Some(subscription);
        debug!("Listening for {} blocks on {}", self.entry.type_name(), self.topic());
        Ok(())
    }

    /// Stops applying inbound blocks.
    pub(crate) async fn stop(&self) -> PipelineResult<()> {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            self.channel.unsubscribe(subscription).await?;
        }
        Ok(())
    }

    /// Announces a newly created object.
    pub async fn push_creation(&self, object: &TypedObject) -> PipelineResult<usize> {
        let block = ReplicationBlock::created(self.session, object.id(), object.serialize()?);
        Ok(self.channel.publish(&block).await?)
    }

    /// Announces a committed change.
    pub async fn push_update(&self, object: &TypedObject) -> PipelineResult<usize> {
        let block = ReplicationBlock::updated(self.session, object.id(), object.serialize()?);
        Ok(self.channel.publish(&block).await?)
    }

    /// Announces a deletion.
    pub async fn push_removal(&self, id: ObjectId) -> PipelineResult<usize> {
        let block = ReplicationBlock::removed(self.session, id);
        Ok(self.channel.publish(&block).await?)
    }
}

/// What an inbound block did to the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The block came from this node and was ignored.
    OwnBlock,
    /// A resident object was updated.
    Updated,
    /// The object was not resident but had subscribers, so it was loaded.
    Materialized,
    /// The object is neither resident nor observed here.
    NotResident,
    /// A created object was inserted.
    Created,
    /// A creation for an object that already exists here was ignored.
    DuplicateCreation,
    /// The object was removed.
    Removed,
    /// A removal for an object that is not resident here.
    AlreadyAbsent,
}

/// Applies blocks received on one type's topic to the local cache.
///
/// Each block is applied under the object's read lock, so it never lands in
/// the middle of a local writer's change.
pub struct BlockApplier {
    entry: Arc<TypeEntry>,
    session: SessionId,
    local: Arc<LocalCache>,
    locks: Arc<dyn NetworkLockService>,
    cache: Option<Arc<dyn DataProvider>>,
}

impl BlockApplier {
    pub(crate) fn new(
        entry: Arc<TypeEntry>,
        session: SessionId,
        local: Arc<LocalCache>,
        locks: Arc<dyn NetworkLockService>,
        cache: Option<Arc<dyn DataProvider>>,
    ) -> Self {
        Self {
            entry,
            session,
            local,
            locks,
            cache,
        }
    }

    /// Applies one block.
    pub async fn apply(&self, block: ReplicationBlock) -> PipelineResult<ApplyOutcome> {
        if block.sender() == self.session {
            trace!("Ignoring own {} block for {}", block.kind(), block.object_id());
            return Ok(ApplyOutcome::OwnBlock);
        }
        let descriptor = self.entry.descriptor();
        let _guard = self
            .locks
            .read_lock(&descriptor.lock_key(block.object_id()))
            .acquire()
            .await?;

        match block {
            ReplicationBlock::Updated {
                object_id, state, ..
            } => self.apply_update(object_id, state).await,

            ReplicationBlock::Created {
                object_id, state, ..
            } => {
                if self.local.exists(descriptor, object_id) {
                    warn!(
                        "Ignoring duplicate creation of {} [{object_id}]",
                        descriptor.identifier()
                    );
                    return Ok(ApplyOutcome::DuplicateCreation);
                }
                self.local.materialize(&self.entry, object_id, state)?;
                debug!("Inserted replicated {} [{object_id}]", descriptor.identifier());
                Ok(ApplyOutcome::Created)
            }

            ReplicationBlock::Removed { object_id, .. } => {
                if self.local.remove(descriptor, object_id) {
                    debug!("Removed replicated {} [{object_id}]", descriptor.identifier());
                    Ok(ApplyOutcome::Removed)
                } else {
                    Ok(ApplyOutcome::AlreadyAbsent)
                }
            }
        }
    }

    async fn apply_update(&self, id: ObjectId, state: Value) -> PipelineResult<ApplyOutcome> {
        let descriptor = self.entry.descriptor();
        let resident = self.local.peek(descriptor, id);
        if resident.is_none() && !self.local.has_subscribers(&descriptor.lock_key(id)) {
            return Ok(ApplyOutcome::NotResident);
        }

        let state = self.latest_state(id, state).await;
        match resident {
            Some(object) => {
                object.sync_from(state)?;
                self.local.notify_subscribers(&object);
                debug!("Applied replicated update to {}", object.key());
                Ok(ApplyOutcome::Updated)
            }
            None => {
                self.local.materialize(&self.entry, id, state)?;
                debug!("Loaded observed {} [{id}] from replicated update", descriptor.identifier());
                Ok(ApplyOutcome::Materialized)
            }
        }
    }

    /// The last committed state: the distributed cache's copy when the type
    /// uses one, otherwise the state carried by the block. Blocks from
    /// different writers may arrive out of order, the cache never does.
    async fn latest_state(&self, id: ObjectId, carried: Value) -> Value {
        let descriptor = self.entry.descriptor();
        let cache = match &self.cache {
            Some(cache) if descriptor.context().is_cache_allowed() => cache,
            _ => return carried,
        };
        match cache.load_serialized(descriptor, id).await {
            Ok(Some(latest)) => latest,
            Ok(None) => carried,
            Err(e) => {
                warn!("Using block state for {} [{id}], cache read failed: {e}", descriptor.identifier());
                carried
            }
        }
    }
}

#[async_trait]
impl BlockListener for BlockApplier {
    async fn on_block(&self, block: ReplicationBlock) {
        let kind = block.kind();
        let id = block.object_id();
        if let Err(e) = self.apply(block).await {
            let failure = PipelineError::ReplicationApplyFailed(format!(
                "{kind} block for {} [{id}]: {e}",
                self.entry.descriptor().identifier()
            ));
            warn!("{failure}");
        }
    }
}
