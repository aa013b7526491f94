//! Copies serialized state between tiers, honouring each type's
//! [`DataContext`](tierstack_types::DataContext).

use crate::error::{PipelineError, PipelineResult};
use crate::local_cache::LocalCache;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tierstack_storage::DataProvider;
use tierstack_types::{DataDescriptor, ObjectId, Tier};
use tracing::{debug, warn};

/// The three tiers of one pipeline. The distributed cache and storage are
/// optional.
pub struct TierSynchronizer {
    local: Arc<LocalCache>,
    cache: Option<Arc<dyn DataProvider>>,
    storage: Option<Arc<dyn DataProvider>>,
}

impl TierSynchronizer {
    pub fn new(
        local: Arc<LocalCache>,
        cache: Option<Arc<dyn DataProvider>>,
        storage: Option<Arc<dyn DataProvider>>,
    ) -> Self {
        Self {
            local,
            cache,
            storage,
        }
    }

    /// The backend serving a tier, if configured.
    pub fn provider(&self, tier: Tier) -> Option<&dyn DataProvider> {
        match tier {
            Tier::Local => Some(self.local.as_ref() as &dyn DataProvider),
            Tier::DistributedCache => self.cache.as_deref(),
            Tier::Storage => self.storage.as_deref(),
        }
    }

    pub(crate) fn cache_provider(&self) -> Option<Arc<dyn DataProvider>> {
        self.cache.clone()
    }

    /// Returns the backend for a tier only if it is configured and the type
    /// may use it.
    fn usable(&self, tier: Tier, descriptor: &DataDescriptor) -> Option<&dyn DataProvider> {
        if descriptor.context().allows(tier) {
            self.provider(tier)
        } else {
            None
        }
    }

    /// Returns true if the tier is configured and allowed for the type.
    pub fn is_available(&self, tier: Tier, descriptor: &DataDescriptor) -> bool {
        self.usable(tier, descriptor).is_some()
    }

    /// Copies one object from `source` to `destination`, overwriting the
    /// destination. Returns false without touching anything when the tiers
    /// are the same, either tier is unavailable for the type, or the source
    /// does not hold the object.
    pub async fn copy(
        &self,
        source: Tier,
        destination: Tier,
        descriptor: &DataDescriptor,
        id: ObjectId,
    ) -> PipelineResult<bool> {
        if source == destination {
            warn!("Refusing to copy {} [{id}] from {source} onto itself", descriptor.identifier());
            return Ok(false);
        }
        let (Some(from), Some(to)) = (
            self.usable(source, descriptor),
            self.usable(destination, descriptor),
        ) else {
            return Ok(false);
        };

        if !from
            .exists(descriptor, id)
            .await
            .map_err(PipelineError::tier(source))?
        {
            debug!("{} [{id}] not in {source}, nothing to copy", descriptor.identifier());
            return Ok(false);
        }
        let Some(data) = from
            .load_serialized(descriptor, id)
            .await
            .map_err(PipelineError::tier(source))?
        else {
            return Ok(false);
        };
        to.save(descriptor, id, data)
            .await
            .map_err(PipelineError::tier(destination))?;
        debug!(
            "Copied {} [{id}] {source} -> {destination}",
            descriptor.identifier()
        );
        Ok(true)
    }

    /// Returns true if an available tier holds the object.
    pub async fn exists_in(
        &self,
        tier: Tier,
        descriptor: &DataDescriptor,
        id: ObjectId,
    ) -> PipelineResult<bool> {
        match self.usable(tier, descriptor) {
            Some(provider) => provider
                .exists(descriptor, id)
                .await
                .map_err(PipelineError::tier(tier)),
            None => Ok(false),
        }
    }

    /// Loads the serialized form from an available tier.
    pub async fn load_from(
        &self,
        tier: Tier,
        descriptor: &DataDescriptor,
        id: ObjectId,
    ) -> PipelineResult<Option<Value>> {
        match self.usable(tier, descriptor) {
            Some(provider) => provider
                .load_serialized(descriptor, id)
                .await
                .map_err(PipelineError::tier(tier)),
            None => Ok(None),
        }
    }

    /// Removes the object from an available tier.
    pub async fn remove_from(
        &self,
        tier: Tier,
        descriptor: &DataDescriptor,
        id: ObjectId,
    ) -> PipelineResult<bool> {
        match self.usable(tier, descriptor) {
            Some(provider) => provider
                .remove(descriptor, id)
                .await
                .map_err(PipelineError::tier(tier)),
            None => Ok(false),
        }
    }

    /// Lists the ids held by an available tier.
    pub async fn list_ids(
        &self,
        tier: Tier,
        descriptor: &DataDescriptor,
    ) -> PipelineResult<HashSet<ObjectId>> {
        match self.usable(tier, descriptor) {
            Some(provider) => provider
                .list_ids(descriptor)
                .await
                .map_err(PipelineError::tier(tier)),
            None => Ok(HashSet::new()),
        }
    }
}
