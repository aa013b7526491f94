mod common;

use common::{
    hook_count, read_int, standalone, state_of, test_descriptor, Cluster, FlakyProvider, TestData,
};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tierstack_pipeline::{DataSubscriber, Pipeline, PipelineConfig, PipelineError};
use tierstack_storage::{DataProvider, MemoryProvider, StorageConfig};
use tierstack_types::{DataContext, DataDescriptor, ObjectId, PreloadStrategy};

fn memory() -> Arc<MemoryProvider> {
    Arc::new(MemoryProvider::new())
}

// ── save_all / flush_all ─────────────────────────────────────────

#[tokio::test]
async fn save_all_empties_local_tier() {
    let cache = memory();
    let storage = memory();
    let pipeline = standalone(Some(cache.clone()), Some(storage.clone()), test_descriptor()).await;
    let ids: Vec<_> = (0..3).map(|_| ObjectId::new()).collect();
    let mut accesses = Vec::new();
    for id in &ids {
        let access = pipeline.load_or_create::<TestData>(*id).await.unwrap();
        access.update(false, |d| d.test_int = 7).await.unwrap();
        accesses.push(access);
    }

    assert_eq!(pipeline.save_all().await.unwrap(), 3);
    assert!(pipeline.local_cache().is_empty());
    for id in &ids {
        assert_eq!(
            storage.load_serialized(&test_descriptor(), *id).await.unwrap(),
            Some(state_of(&TestData::with_int(*id, 7)))
        );
        assert_eq!(hook_count(*id, "cleanup"), 1);
    }
    assert_eq!(cache.len(), 3);

    // Evicted handles are stale; loading again works.
    assert!(!accesses[0].is_valid());
    let reloaded = pipeline.require::<TestData>(ids[0]).await.unwrap();
    assert_eq!(read_int(&reloaded).await, 7);
}

#[tokio::test]
async fn save_all_respects_data_context() {
    let cache = memory();
    let storage = memory();
    let descriptor = test_descriptor().with_context(DataContext::CacheOnly);
    let pipeline = standalone(Some(cache.clone()), Some(storage.clone()), descriptor).await;
    pipeline.load_or_create::<TestData>(ObjectId::new()).await.unwrap();

    pipeline.save_all().await.unwrap();
    assert_eq!(cache.len(), 1);
    assert!(storage.is_empty());
}

#[tokio::test]
async fn save_all_keeps_objects_that_failed() {
    let storage = Arc::new(FlakyProvider::default());
    let pipeline = standalone(None, Some(storage.clone()), test_descriptor()).await;
    let good = ObjectId::new();
    let bad = ObjectId::new();
    pipeline.load_or_create::<TestData>(good).await.unwrap();
    pipeline.load_or_create::<TestData>(bad).await.unwrap();

    storage.refuse(bad);
    let err = pipeline.save_all().await.unwrap_err();
    assert!(matches!(err, PipelineError::TierOperationFailed { .. }));

    let local = pipeline.local_cache();
    assert!(!local.exists(&test_descriptor(), good));
    assert!(local.exists(&test_descriptor(), bad));
}

#[tokio::test]
async fn flush_all_keeps_objects_resident() {
    let storage = memory();
    let pipeline = standalone(None, Some(storage.clone()), test_descriptor()).await;
    let id = ObjectId::new();
    let access = pipeline.load_or_create::<TestData>(id).await.unwrap();
    access.update(false, |d| d.test_int = 3).await.unwrap();
    assert_eq!(
        storage.load_serialized(&test_descriptor(), id).await.unwrap(),
        Some(state_of(&TestData::with_int(id, 0)))
    );

    assert_eq!(pipeline.flush_all().await.unwrap(), 1);
    assert!(access.is_valid());
    assert_eq!(
        storage.load_serialized(&test_descriptor(), id).await.unwrap(),
        Some(state_of(&TestData::with_int(id, 3)))
    );
}

#[tokio::test]
async fn save_all_waits_for_open_writer() {
    let cache = memory();
    let storage = memory();
    let pipeline = standalone(Some(cache.clone()), Some(storage.clone()), test_descriptor()).await;
    let id = ObjectId::new();
    let access = pipeline.load_or_create::<TestData>(id).await.unwrap();

    let handle = access.write().await.unwrap();
    handle.with_mut(|d| d.test_int = 42).unwrap();
    let saving = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.save_all().await }
    });
    common::settle().await;

    assert!(!saving.is_finished());
    assert_eq!(
        cache.load_serialized(&test_descriptor(), id).await.unwrap(),
        Some(state_of(&TestData::with_int(id, 0)))
    );

    handle.commit(true).await.unwrap();
    assert_eq!(saving.await.unwrap().unwrap(), 1);
    assert!(pipeline.local_cache().is_empty());
    for tier in [&cache, &storage] {
        assert_eq!(
            tier.load_serialized(&test_descriptor(), id).await.unwrap(),
            Some(state_of(&TestData::with_int(id, 42)))
        );
    }
}

#[tokio::test]
async fn flush_all_drops_abandoned_changes() {
    let cache = memory();
    let storage = memory();
    let pipeline = standalone(Some(cache.clone()), Some(storage.clone()), test_descriptor()).await;
    let id = ObjectId::new();
    let access = pipeline.load_or_create::<TestData>(id).await.unwrap();
    {
        let handle = access.write().await.unwrap();
        handle.with_mut(|d| d.test_int = 9).unwrap();
    }

    assert_eq!(pipeline.flush_all().await.unwrap(), 1);
    assert_eq!(read_int(&access).await, 0);
    for tier in [&cache, &storage] {
        assert_eq!(
            tier.load_serialized(&test_descriptor(), id).await.unwrap(),
            Some(state_of(&TestData::with_int(id, 0)))
        );
    }
    assert_eq!(hook_count(id, "sync"), 0);
}

// ── Preloading ───────────────────────────────────────────────────

fn preloaded() -> DataDescriptor {
    test_descriptor().with_preload(PreloadStrategy::LoadBefore)
}

async fn seeded_tiers() -> (Arc<MemoryProvider>, Arc<MemoryProvider>, [ObjectId; 3]) {
    let cache = memory();
    let storage = memory();
    let ids = [ObjectId::new(), ObjectId::new(), ObjectId::new()];
    let descriptor = preloaded();
    storage
        .save(&descriptor, ids[0], state_of(&TestData::with_int(ids[0], 1)))
        .await
        .unwrap();
    storage
        .save(&descriptor, ids[1], state_of(&TestData::with_int(ids[1], 2)))
        .await
        .unwrap();
    cache
        .save(&descriptor, ids[1], state_of(&TestData::with_int(ids[1], 20)))
        .await
        .unwrap();
    cache
        .save(&descriptor, ids[2], state_of(&TestData::with_int(ids[2], 30)))
        .await
        .unwrap();
    (cache, storage, ids)
}

#[tokio::test]
async fn preload_all_pulls_cache_then_storage() {
    let (cache, storage, ids) = seeded_tiers().await;
    let pipeline = Pipeline::builder()
        .config(PipelineConfig {
            preload_on_register: false,
            ..PipelineConfig::default()
        })
        .distributed_cache(cache)
        .storage(storage)
        .build()
        .unwrap();
    pipeline.register_type::<TestData>(preloaded()).await.unwrap();
    assert!(pipeline.local_cache().is_empty());

    assert_eq!(pipeline.preload_all().await.unwrap(), 3);
    let resident: Vec<_> = ids
        .iter()
        .map(|id| {
            pipeline
                .local_cache()
                .peek(&preloaded(), *id)
                .unwrap()
                .read_as(|d: &TestData| d.test_int)
                .unwrap()
        })
        .collect();
    // The cached copy of the shared id wins over the stored one.
    assert_eq!(resident, vec![1, 20, 30]);
    for id in ids {
        assert_eq!(hook_count(id, "load"), 1);
    }

    // Everything is resident already.
    assert_eq!(pipeline.preload_all().await.unwrap(), 0);
}

#[tokio::test]
async fn registration_preloads_by_default() {
    let (cache, storage, ids) = seeded_tiers().await;
    let pipeline = standalone(Some(cache), Some(storage), preloaded()).await;
    for id in ids {
        assert!(pipeline.local_cache().exists(&preloaded(), id));
    }
}

#[tokio::test]
async fn on_need_types_are_not_preloaded() {
    let (cache, storage, _) = seeded_tiers().await;
    let pipeline = standalone(Some(cache), Some(storage), test_descriptor()).await;
    assert_eq!(pipeline.preload_all().await.unwrap(), 0);
    assert!(pipeline.local_cache().is_empty());
}

// ── Idle eviction ────────────────────────────────────────────────

#[tokio::test]
async fn idle_objects_are_saved_and_evicted() {
    let storage = memory();
    let descriptor = test_descriptor().with_idle_timeout(Some(Duration::ZERO));
    let pipeline = standalone(None, Some(storage.clone()), descriptor.clone()).await;
    let idle = ObjectId::new();
    let observed = ObjectId::new();
    let access = pipeline.load_or_create::<TestData>(idle).await.unwrap();
    pipeline.load_or_create::<TestData>(observed).await.unwrap();
    {
        let handle = access.write().await.unwrap();
        handle.with_mut(|d| d.test_int = 4).unwrap();
    }

    let subscriber = DataSubscriber::new(|d: &TestData| d.test_int, |_| {}, 0);
    pipeline.subscribe(&subscriber, observed).unwrap();

    assert_eq!(pipeline.evict_idle().await.unwrap(), 1);
    assert!(!pipeline.local_cache().exists(&descriptor, idle));
    assert!(pipeline.local_cache().exists(&descriptor, observed));
    assert_eq!(
        storage.load_serialized(&descriptor, idle).await.unwrap(),
        Some(state_of(&TestData::with_int(idle, 4)))
    );
    assert_eq!(hook_count(idle, "cleanup"), 1);
}

#[tokio::test]
async fn recently_used_objects_stay() {
    let descriptor = test_descriptor().with_idle_timeout(Some(Duration::from_secs(3600)));
    let pipeline = standalone(None, Some(memory()), descriptor).await;
    pipeline.load_or_create::<TestData>(ObjectId::new()).await.unwrap();
    assert_eq!(pipeline.evict_idle().await.unwrap(), 0);
    assert_eq!(pipeline.local_cache().len(), 1);
}

#[tokio::test]
async fn objects_without_outer_tier_are_never_evicted() {
    let descriptor = test_descriptor().with_idle_timeout(Some(Duration::ZERO));
    let pipeline = standalone(None, None, descriptor).await;
    pipeline.load_or_create::<TestData>(ObjectId::new()).await.unwrap();
    assert_eq!(pipeline.evict_idle().await.unwrap(), 0);
    assert_eq!(pipeline.local_cache().len(), 1);
}

#[tokio::test]
async fn eviction_can_be_disabled_per_type() {
    let descriptor = test_descriptor().with_idle_timeout(None);
    let pipeline = standalone(None, Some(memory()), descriptor).await;
    pipeline.load_or_create::<TestData>(ObjectId::new()).await.unwrap();
    assert_eq!(pipeline.evict_idle().await.unwrap(), 0);
}

// ── Background maintenance ───────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn background_task_flushes_periodically() {
    let storage = memory();
    let pipeline = Pipeline::builder()
        .config(PipelineConfig {
            flush_interval_secs: 1,
            evict_idle: false,
            ..PipelineConfig::default()
        })
        .storage(storage.clone())
        .build()
        .unwrap();
    pipeline
        .register_type::<TestData>(test_descriptor())
        .await
        .unwrap();
    let id = ObjectId::new();
    let access = pipeline.load_or_create::<TestData>(id).await.unwrap();
    {
        let handle = access.write().await.unwrap();
        handle.with_mut(|d| d.test_int = 12).unwrap();
    }

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(
        storage.load_serialized(&test_descriptor(), id).await.unwrap(),
        Some(state_of(&TestData::with_int(id, 12)))
    );
    assert!(access.is_valid());
}

// ── Shutdown ─────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_saves_and_stops() {
    let cluster = Cluster::new();
    let node = cluster.node("a").await;
    let topic = test_descriptor().replication_topic();
    let id = ObjectId::new();
    node.load_or_create::<TestData>(id).await.unwrap();
    assert_eq!(cluster.broker.subscriber_count(&topic), 1);

    node.shutdown().await.unwrap();
    assert!(!node.is_running());
    assert!(node.local_cache().is_empty());
    assert!(cluster.storage.exists(&test_descriptor(), id).await.unwrap());
    assert_eq!(cluster.broker.subscriber_count(&topic), 0);
    assert!(!node.synchronizer::<TestData>().unwrap().is_listening());

    assert!(matches!(
        node.load::<TestData>(id).await.unwrap_err(),
        PipelineError::ShutDown
    ));
    assert!(matches!(
        node.save_all().await.unwrap_err(),
        PipelineError::ShutDown
    ));

    // A second shutdown is a no-op.
    node.shutdown().await.unwrap();
}

// ── Configuration ────────────────────────────────────────────────

#[test]
fn config_defaults() {
    let config = PipelineConfig::from_toml_str("").unwrap();
    assert_eq!(config, PipelineConfig::default());
    assert_eq!(config.node_name, "tierstack");
    assert!(config.flush_interval().is_none());
    assert!(config.evict_idle);
    assert!(config.preload_on_register);
}

#[test]
fn config_from_toml() {
    let config = PipelineConfig::from_toml_str(
        r#"
        node_name = "lobby-1"
        flush_interval_secs = 300
        evict_idle = false

        [storage]
        backend = "sqlite"
        path = "data/pipeline.db"
        "#,
    )
    .unwrap();
    assert_eq!(config.node_name, "lobby-1");
    assert_eq!(config.flush_interval(), Some(Duration::from_secs(300)));
    assert!(!config.evict_idle);
    assert_eq!(
        config.storage,
        Some(StorageConfig::Sqlite {
            path: PathBuf::from("data/pipeline.db")
        })
    );
}

#[test]
fn invalid_config_is_reported() {
    let err = PipelineConfig::from_toml_str("flush_interval_secs = \"soon\"").unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));

    let err = PipelineConfig::from_file("/nonexistent/tierstack.toml").unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
}

#[tokio::test]
async fn configured_storage_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("pipeline.toml");
    std::fs::write(
        &config_path,
        format!(
            "node_name = \"files\"\n\n[storage]\nbackend = \"json_file\"\npath = {:?}\n",
            dir.path().join("objects").display().to_string()
        ),
    )
    .unwrap();
    let config = PipelineConfig::from_file(&config_path).unwrap();
    let id = ObjectId::new();

    let first = Pipeline::builder().config(config.clone()).build().unwrap();
    first
        .register_type::<TestData>(test_descriptor())
        .await
        .unwrap();
    first
        .load_or_create_with::<TestData, _>(id, |d| d.test_string = "kept".into())
        .await
        .unwrap();
    first.shutdown().await.unwrap();

    let second = Pipeline::builder().config(config).build().unwrap();
    second
        .register_type::<TestData>(test_descriptor())
        .await
        .unwrap();
    let access = second.require::<TestData>(id).await.unwrap();
    assert_eq!(
        access.read().await.unwrap().with(|d| d.test_string.clone()).unwrap(),
        "kept"
    );
}
