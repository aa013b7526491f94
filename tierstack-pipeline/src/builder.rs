//! Explicit construction of a [`Pipeline`].

use crate::config::PipelineConfig;
use crate::engine::PipelineCore;
use crate::error::{PipelineError, PipelineResult};
use crate::local_cache::LocalCache;
use crate::maintenance;
use crate::pipeline::Pipeline;
use crate::registry::DataRegistry;
use crate::tier_sync::TierSynchronizer;
use std::sync::Arc;
use tierstack_storage::DataProvider;
use tierstack_sync::{LocalLockService, NetworkLockService, ReplicationTransport};
use tierstack_types::SessionId;
use tracing::info;

/// Collects the backends of one node and builds its [`Pipeline`].
///
/// Without a distributed cache, storage or transport the pipeline runs as a
/// single node with process-local locks.
#[derive(Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
    session: Option<SessionId>,
    cache: Option<Arc<dyn DataProvider>>,
    storage: Option<Arc<dyn DataProvider>>,
    locks: Option<Arc<dyn NetworkLockService>>,
    transport: Option<Arc<dyn ReplicationTransport>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the generated session id.
    pub fn session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    pub fn distributed_cache(mut self, cache: Arc<dyn DataProvider>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the storage backend, taking precedence over `config.storage`.
    pub fn storage(mut self, storage: Arc<dyn DataProvider>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn lock_service(mut self, locks: Arc<dyn NetworkLockService>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn ReplicationTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Opens the configured backends and starts the pipeline. The
    /// background flush task, if configured, runs on the current tokio
    /// runtime.
    pub fn build(self) -> PipelineResult<Pipeline> {
        let storage = match (self.storage, &self.config.storage) {
            (Some(storage), _) => Some(storage),
            (None, Some(config)) => Some(
                config
                    .open()
                    .map_err(|e| PipelineError::Config(format!("cannot open storage: {e}")))?,
            ),
            (None, None) => None,
        };
        let locks = self
            .locks
            .unwrap_or_else(|| Arc::new(LocalLockService::new()));
        let session = self.session.unwrap_or_default();

        let registry = Arc::new(DataRegistry::new());
        let local = Arc::new(LocalCache::new(Arc::clone(&registry), Arc::clone(&locks)));
        let tiers = TierSynchronizer::new(Arc::clone(&local), self.cache.clone(), storage.clone());

        info!(
            "Starting pipeline {} (session {session}, cache: {}, storage: {}, replication: {})",
            self.config.node_name,
            self.cache.as_ref().map_or("none", |cache| cache.name()),
            storage.as_ref().map_or("none", |storage| storage.name()),
            if self.transport.is_some() { "on" } else { "off" },
        );

        let flush_interval = self.config.flush_interval();
        let evict_idle = self.config.evict_idle;
        let core = Arc::new(PipelineCore::new(
            session,
            self.config,
            registry,
            local,
            tiers,
            locks,
            self.transport,
        ));
        if let Some(interval) = flush_interval {
            if let Some(handle) = maintenance::spawn(Arc::downgrade(&core), interval, evict_idle) {
                core.set_maintenance(handle);
            }
        }
        Ok(Pipeline::from_core(core))
    }
}
