//! Shared fixtures for pipeline tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;
use tierstack_pipeline::{DataAccess, Pipeline, PipelineConfig, PipelineData};
use tierstack_storage::{DataProvider, MemoryProvider, StorageError, StorageResult};
use tierstack_sync::{ClusterLockService, MemoryBroker, MemoryLockBackend};
use tierstack_types::{DataDescriptor, ObjectId};

// ── Test data ────────────────────────────────────────────────────

static HOOKS: LazyLock<Mutex<HashMap<ObjectId, Vec<&'static str>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn record(id: ObjectId, hook: &'static str) {
    HOOKS.lock().unwrap().entry(id).or_default().push(hook);
}

/// Every hook fired for an object, on any node, in order.
pub fn hook_events(id: ObjectId) -> Vec<&'static str> {
    HOOKS.lock().unwrap().get(&id).cloned().unwrap_or_default()
}

pub fn hook_count(id: ObjectId, hook: &str) -> usize {
    hook_events(id).iter().filter(|h| **h == hook).count()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestData {
    pub id: ObjectId,
    pub test_int: i64,
    pub test_string: String,
    pub list: Vec<String>,
    pub map: BTreeMap<String, i64>,
}

impl TestData {
    pub fn with_int(id: ObjectId, test_int: i64) -> Self {
        Self {
            test_int,
            ..Self::instantiate(id)
        }
    }
}

impl PipelineData for TestData {
    fn instantiate(id: ObjectId) -> Self {
        Self {
            id,
            test_int: 0,
            test_string: String::new(),
            list: Vec::new(),
            map: BTreeMap::new(),
        }
    }

    fn on_create(&mut self) {
        record(self.id, "create");
    }

    fn on_load(&mut self) {
        record(self.id, "load");
    }

    fn on_sync(&mut self, _before: &Value) {
        record(self.id, "sync");
    }

    fn on_delete(&mut self) {
        record(self.id, "delete");
    }

    fn on_cleanup(&mut self) {
        record(self.id, "cleanup");
    }
}

/// A second type, used for registry and mismatch tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
}

impl PipelineData for Note {
    fn instantiate(_id: ObjectId) -> Self {
        Self {
            text: String::new(),
        }
    }
}

pub fn test_descriptor() -> DataDescriptor {
    DataDescriptor::new("test_data").with_classifier("tests")
}

pub fn state_of(data: &TestData) -> Value {
    serde_json::to_value(data).unwrap()
}

// ── Nodes ────────────────────────────────────────────────────────

/// Routes pipeline logs to the test harness; filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Backends shared by every node of one simulated cluster.
pub struct Cluster {
    pub cache: Arc<MemoryProvider>,
    pub storage: Arc<MemoryProvider>,
    pub locks: Arc<MemoryLockBackend>,
    pub broker: MemoryBroker,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(MemoryProvider::named("cache")),
            storage: Arc::new(MemoryProvider::named("storage")),
            locks: Arc::new(MemoryLockBackend::new()),
            broker: MemoryBroker::new(),
        }
    }

    /// A node with `TestData` registered under [`test_descriptor`].
    pub async fn node(&self, name: &str) -> Pipeline {
        self.node_with(name, test_descriptor()).await
    }

    pub async fn node_with(&self, name: &str, descriptor: DataDescriptor) -> Pipeline {
        init_tracing();
        let pipeline = Pipeline::builder()
            .config(PipelineConfig {
                node_name: name.to_string(),
                ..PipelineConfig::default()
            })
            .distributed_cache(self.cache.clone())
            .storage(self.storage.clone())
            .lock_service(Arc::new(ClusterLockService::new(self.locks.clone())))
            .transport(Arc::new(self.broker.clone()))
            .build()
            .unwrap();
        pipeline.register_type::<TestData>(descriptor).await.unwrap();
        pipeline
    }
}

/// A node with no replication, backed by the given cache and storage.
pub async fn standalone(
    cache: Option<Arc<dyn DataProvider>>,
    storage: Option<Arc<dyn DataProvider>>,
    descriptor: DataDescriptor,
) -> Pipeline {
    init_tracing();
    let mut builder = Pipeline::builder();
    if let Some(cache) = cache {
        builder = builder.distributed_cache(cache);
    }
    if let Some(storage) = storage {
        builder = builder.storage(storage);
    }
    let pipeline = builder.build().unwrap();
    pipeline.register_type::<TestData>(descriptor).await.unwrap();
    pipeline
}

pub async fn read_int(access: &DataAccess<TestData>) -> i64 {
    access.read().await.unwrap().with(|d| d.test_int).unwrap()
}

/// Resident value of `test_int` on a node, if the object is resident.
pub async fn resident_int(pipeline: &Pipeline, id: ObjectId) -> Option<i64> {
    use tierstack_pipeline::LoadingStrategy;
    let access = pipeline
        .load_with_strategy::<TestData>(id, LoadingStrategy::LoadLocal)
        .await
        .unwrap()?;
    Some(read_int(&access).await)
}

// ── Waiting ──────────────────────────────────────────────────────

pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Gives in-flight replication a moment to land.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ── Providers ────────────────────────────────────────────────────

/// An in-memory provider that refuses to save or remove chosen ids.
#[derive(Default)]
pub struct FlakyProvider {
    pub inner: MemoryProvider,
    refused: Mutex<HashSet<ObjectId>>,
}

impl FlakyProvider {
    pub fn refuse(&self, id: ObjectId) {
        self.refused.lock().unwrap().insert(id);
    }

    fn check(&self, op: &str, id: ObjectId) -> StorageResult<()> {
        if self.refused.lock().unwrap().contains(&id) {
            Err(StorageError::Backend(format!("{op} of {id} refused")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DataProvider for FlakyProvider {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn exists(&self, descriptor: &DataDescriptor, id: ObjectId) -> StorageResult<bool> {
        self.inner.exists(descriptor, id).await
    }

    async fn load_serialized(
        &self,
        descriptor: &DataDescriptor,
        id: ObjectId,
    ) -> StorageResult<Option<Value>> {
        self.inner.load_serialized(descriptor, id).await
    }

    async fn save(&self, descriptor: &DataDescriptor, id: ObjectId, data: Value) -> StorageResult<()> {
        self.check("save", id)?;
        self.inner.save(descriptor, id, data).await
    }

    async fn remove(&self, descriptor: &DataDescriptor, id: ObjectId) -> StorageResult<bool> {
        self.check("remove", id)?;
        self.inner.remove(descriptor, id).await
    }

    async fn list_ids(&self, descriptor: &DataDescriptor) -> StorageResult<HashSet<ObjectId>> {
        self.inner.list_ids(descriptor).await
    }
}
