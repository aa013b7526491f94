use std::collections::HashSet;
use std::str::FromStr;
use tierstack_types::{ObjectId, SessionId};

// ── ObjectId ──────────────────────────────────────────────────────

#[test]
fn object_id_new_is_unique() {
    let a = ObjectId::new();
    let b = ObjectId::new();
    assert_ne!(a, b);
}

#[test]
fn object_id_from_uuid_roundtrip() {
    let uuid = uuid::Uuid::new_v4();
    let id = ObjectId::from_uuid(uuid);
    assert_eq!(id.as_uuid(), uuid);
    assert_eq!(ObjectId::from(uuid), id);
}

#[test]
fn object_id_display_and_parse() {
    let id = ObjectId::new();
    let parsed = ObjectId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn object_id_from_str() {
    let id = ObjectId::new();
    let parsed = ObjectId::from_str(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn object_id_parse_invalid() {
    assert!(ObjectId::parse("not-a-uuid").is_err());
    assert!(ObjectId::from_str("garbage").is_err());
}

#[test]
fn object_id_hash_and_eq() {
    let id = ObjectId::new();
    let mut set = HashSet::new();
    set.insert(id);
    set.insert(id);
    assert_eq!(set.len(), 1);
}

#[test]
fn object_id_serializes_as_plain_uuid() {
    let id = ObjectId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
    let back: ObjectId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

// ── SessionId ─────────────────────────────────────────────────────

#[test]
fn session_id_new_is_unique() {
    assert_ne!(SessionId::new(), SessionId::default());
}

#[test]
fn session_id_from_uuid_roundtrip() {
    let uuid = uuid::Uuid::now_v7();
    assert_eq!(SessionId::from_uuid(uuid).as_uuid(), uuid);
}

#[test]
fn session_id_display_and_from_str() {
    let id = SessionId::new();
    let parsed: SessionId = id.to_string().parse().unwrap();
    assert_eq!(parsed, id);
}
