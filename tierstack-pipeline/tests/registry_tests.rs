mod common;

use common::{test_descriptor, Note, TestData};
use tierstack_pipeline::{DataRegistry, Pipeline, PipelineError};
use tierstack_types::{DataContext, DataDescriptor, ObjectId, PreloadStrategy};

// ── DataRegistry ─────────────────────────────────────────────────

#[test]
fn register_returns_entry_once() {
    let registry = DataRegistry::new();
    let (entry, added) = registry.register::<TestData>(test_descriptor()).unwrap();
    assert!(added);
    assert_eq!(entry.descriptor(), &test_descriptor());
    assert!(entry.type_name().ends_with("TestData"));

    let (again, added) = registry.register::<TestData>(test_descriptor()).unwrap();
    assert!(!added);
    assert_eq!(again.type_id(), entry.type_id());
    assert_eq!(registry.len(), 1);
}

#[test]
fn reregistering_with_other_descriptor_conflicts() {
    let registry = DataRegistry::new();
    registry.register::<TestData>(test_descriptor()).unwrap();

    let changed = test_descriptor().with_context(DataContext::CacheOnly);
    let err = registry.register::<TestData>(changed).unwrap_err();
    assert!(matches!(err, PipelineError::ConflictingRegistration(_)));
}

#[test]
fn storage_identifier_is_unique_across_types() {
    let registry = DataRegistry::new();
    registry.register::<TestData>(DataDescriptor::new("shared")).unwrap();

    let err = registry
        .register::<Note>(DataDescriptor::new("shared"))
        .unwrap_err();
    match err {
        PipelineError::DuplicateStorageIdentifier {
            identifier,
            existing,
        } => {
            assert_eq!(identifier, "shared");
            assert!(existing.ends_with("TestData"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(registry.len(), 1);
}

#[test]
fn invalid_descriptor_is_rejected() {
    let registry = DataRegistry::new();
    let err = registry
        .register::<TestData>(DataDescriptor::new("has space"))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Descriptor(_)));
    assert!(registry.is_empty());
}

#[test]
fn unregistered_type_is_reported() {
    let registry = DataRegistry::new();
    let err = registry.entry::<Note>().unwrap_err();
    assert!(matches!(err, PipelineError::TypeNotRegistered(name) if name.ends_with("Note")));
}

#[test]
fn lookup_by_identifier() {
    let registry = DataRegistry::new();
    registry.register::<TestData>(test_descriptor()).unwrap();
    registry.register::<Note>(DataDescriptor::new("notes")).unwrap();

    let entry = registry.by_identifier("notes").unwrap();
    assert!(entry.type_name().ends_with("Note"));
    assert!(registry.by_identifier("missing").is_none());
}

#[test]
fn all_types_filters_by_classifier() {
    let registry = DataRegistry::new();
    registry.register::<TestData>(test_descriptor()).unwrap();
    registry.register::<Note>(DataDescriptor::new("notes")).unwrap();

    let all: Vec<_> = registry
        .all_types(&[])
        .iter()
        .map(|e| e.descriptor().identifier().to_string())
        .collect();
    assert_eq!(all, vec!["notes", "test_data"]);

    let tests = registry.all_types(&["tests"]);
    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0].descriptor().identifier(), "test_data");

    assert!(registry.all_types(&["other"]).is_empty());
}

// ── Through the pipeline ─────────────────────────────────────────

#[tokio::test]
async fn pipeline_registration_is_idempotent() {
    let pipeline = Pipeline::builder().build().unwrap();
    pipeline
        .register_type::<TestData>(test_descriptor())
        .await
        .unwrap();
    pipeline
        .register_type::<TestData>(test_descriptor())
        .await
        .unwrap();
    assert_eq!(pipeline.registry().len(), 1);
}

#[tokio::test]
async fn operations_on_unregistered_type_fail() {
    let pipeline = Pipeline::builder().build().unwrap();
    let err = pipeline.load::<Note>(ObjectId::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::TypeNotRegistered(_)));

    let err = pipeline.load_or_create::<Note>(ObjectId::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::TypeNotRegistered(_)));
}

#[tokio::test]
async fn synchronizer_exists_only_with_transport() {
    let single = Pipeline::builder().build().unwrap();
    single
        .register_type::<TestData>(test_descriptor())
        .await
        .unwrap();
    assert!(single.synchronizer::<TestData>().is_none());

    let cluster = common::Cluster::new();
    let node = cluster.node("a").await;
    let synchronizer = node.synchronizer::<TestData>().unwrap();
    assert_eq!(synchronizer.topic(), "tierstack:tests:test_data");
    assert!(synchronizer.is_listening());
    assert_eq!(cluster.broker.subscriber_count("tierstack:tests:test_data"), 1);
}

#[tokio::test]
async fn preload_strategy_is_kept_on_the_entry() {
    let pipeline = Pipeline::builder().build().unwrap();
    let descriptor = DataDescriptor::new("preloaded").with_preload(PreloadStrategy::LoadBefore);
    pipeline
        .register_type::<Note>(descriptor.clone())
        .await
        .unwrap();
    let entry = pipeline.registry().entry::<Note>().unwrap();
    assert_eq!(entry.descriptor().preload(), PreloadStrategy::LoadBefore);
}
