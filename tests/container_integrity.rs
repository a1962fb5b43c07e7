//! Container Integrity Tests
//!
//! - Records survive an encrypt/write/read/decrypt cycle
//! - Flipped bits in `authTag` or `data` surface as IntegrityFailure
//! - CRUD operations stay consistent with each other
//! - A missing container reads as empty

use std::fs;
use std::sync::Arc;

use hexabase::container::{FilterExpr, FilterSet, Storage};
use hexabase::{HexaError, KeyManager};
use serde_json::{json, Value};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn open_storage(dir: &TempDir, key: [u8; 32]) -> Storage {
    let keys = Arc::new(KeyManager::from_bytes(key).unwrap());
    Storage::open(dir.path(), keys).unwrap()
}

/// Flip one bit in a hex field of the on-disk envelope
fn flip_hex_field(path: &std::path::Path, field: &str) {
    let mut envelope: Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
    let hex = envelope[field].as_str().unwrap().to_string();

    let mut bytes = hex::decode(&hex).unwrap();
    bytes[0] ^= 0x01;
    envelope[field] = Value::String(hex::encode(bytes));

    fs::write(path, serde_json::to_vec_pretty(&envelope).unwrap()).unwrap();
}

// =============================================================================
// Round Trip
// =============================================================================

#[test]
fn test_round_trip_across_handles() {
    let dir = TempDir::new().unwrap();
    let key = [7u8; 32];

    {
        let storage = open_storage(&dir, key);
        let store = storage.container("items").unwrap();
        store
            .save("a", &json!({ "name": "alpha", "tags": ["x", "y"], "nested": { "n": 1 } }))
            .unwrap();
    }

    let storage = open_storage(&dir, key);
    let record = storage.container("items").unwrap().find_by_id("a").unwrap().unwrap();
    assert_eq!(record["nested"]["n"], 1);
    assert_eq!(record["tags"][1], "y");
}

#[test]
fn test_wrong_key_is_integrity_failure() {
    let dir = TempDir::new().unwrap();
    open_storage(&dir, [1u8; 32])
        .container("items")
        .unwrap()
        .save("a", &json!(1))
        .unwrap();

    let result = open_storage(&dir, [2u8; 32]).container("items").unwrap().load_all();
    assert!(matches!(result, Err(HexaError::IntegrityFailure { .. })));
}

// =============================================================================
// Tamper Detection
// =============================================================================

#[test]
fn test_flipped_auth_tag_detected() {
    let dir = TempDir::new().unwrap();
    let store = open_storage(&dir, [3u8; 32]).container("items").unwrap();
    store.save("a", &json!({ "v": 1 })).unwrap();

    flip_hex_field(store.path(), "authTag");

    let result = store.load_all();
    assert!(
        matches!(result, Err(HexaError::IntegrityFailure { ref container, .. }) if container == "items"),
        "tampered tag must fail closed, got {:?}",
        result
    );
}

#[test]
fn test_flipped_ciphertext_detected() {
    let dir = TempDir::new().unwrap();
    let store = open_storage(&dir, [3u8; 32]).container("items").unwrap();
    store.save("a", &json!({ "v": 1 })).unwrap();

    flip_hex_field(store.path(), "data");

    assert!(matches!(store.load_all(), Err(HexaError::IntegrityFailure { .. })));
    // a write on top of a corrupt container must not silently replace it
    assert!(matches!(store.save("b", &json!(2)), Err(HexaError::IntegrityFailure { .. })));
}

#[test]
fn test_garbage_file_detected() {
    let dir = TempDir::new().unwrap();
    let store = open_storage(&dir, [3u8; 32]).container("items").unwrap();
    fs::write(store.path(), b"{ not an envelope").unwrap();

    assert!(matches!(store.count(), Err(HexaError::IntegrityFailure { .. })));
}

// =============================================================================
// CRUD Consistency
// =============================================================================

#[test]
fn test_crud_consistency() {
    let dir = TempDir::new().unwrap();
    let store = open_storage(&dir, [4u8; 32]).container("people").unwrap();

    store.save("p1", &json!({ "name": "Ada", "age": 36, "team": { "id": "t1" } })).unwrap();
    store.save("p2", &json!({ "name": "Alan", "age": 41, "team": { "id": "t2" } })).unwrap();
    store.save("p3", &json!({ "name": "Grace", "age": 85, "team": { "id": "t1" } })).unwrap();

    assert_eq!(store.count().unwrap(), 3);
    assert_eq!(store.find_all().unwrap().len(), 3);

    let team_one = store.find(&FilterExpr::eq("team.id", "t1").into()).unwrap();
    assert_eq!(team_one.len(), 2);

    let filters = FilterSet::new()
        .and(FilterExpr::like("name", "A%"))
        .and(FilterExpr::gt("age", 40));
    assert_eq!(store.find_one(&filters).unwrap().unwrap()["name"], "Alan");

    store.update("p1", json!({ "age": 37 })).unwrap();
    assert_eq!(store.find_by_id("p1").unwrap().unwrap()["age"], 37);

    assert!(store.delete("p2").unwrap());
    assert!(store.find_by_id("p2").unwrap().is_none());
    assert_eq!(store.count().unwrap(), 2);
}

#[test]
fn test_missing_container_is_empty() {
    let dir = TempDir::new().unwrap();
    let store = open_storage(&dir, [5u8; 32]).container("never_written").unwrap();

    assert!(store.load_all().unwrap().is_empty());
    assert!(store.find(&FilterSet::new()).unwrap().is_empty());
    assert!(!store.delete("x").unwrap());
    assert!(!store.exists());
}

#[test]
fn test_unsafe_container_names_rejected() {
    let dir = TempDir::new().unwrap();
    let storage = open_storage(&dir, [6u8; 32]);

    for name in ["", "../escape", ".hidden", "a/b"] {
        assert!(
            matches!(storage.container(name), Err(HexaError::Validation(_))),
            "{:?} should be rejected",
            name
        );
    }
}
