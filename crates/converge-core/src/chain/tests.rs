//! Tests for the audit chain.

use std::sync::Arc;

use rusqlite::Connection;
use serde_json::json;
use tempfile::TempDir;

use super::{GENESIS_HASH, compute_event_hash, initialize, verify};
use crate::event::{Event, EventType};
use crate::log::EventLog;
use crate::store::SqliteStore;

fn open_log() -> (TempDir, EventLog, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("state.db");
    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    (dir, EventLog::new(store), db_path)
}

fn append_some(log: &EventLog, n: usize) {
    for i in 0..n {
        log.append(
            Event::new(EventType::CheckCompleted, json!({"check": "lint", "n": i}))
                .with_intent("i1"),
        )
        .unwrap();
    }
}

#[test]
fn test_hash_is_deterministic_and_chained() {
    let event = Event::new(EventType::IntentCreated, json!({"b": 2, "a": 1}));
    let h1 = compute_event_hash(GENESIS_HASH, &event);
    let h2 = compute_event_hash(GENESIS_HASH, &event);
    assert_eq!(h1, h2);
    assert_eq!(h1.len(), 64);
    // A different predecessor changes the hash.
    assert_ne!(compute_event_hash(&h1, &event), h1);
}

#[test]
fn test_hash_is_key_order_independent() {
    let mut a = Event::new(EventType::IntentCreated, json!({"x": 1, "y": [2, 3]}));
    let mut b = a.clone();
    a.payload = serde_json::from_str(r#"{"x": 1, "y": [2, 3]}"#).unwrap();
    b.payload = serde_json::from_str(r#"{"y": [2, 3], "x": 1}"#).unwrap();
    assert_eq!(
        compute_event_hash(GENESIS_HASH, &a),
        compute_event_hash(GENESIS_HASH, &b)
    );
}

#[test]
fn test_verify_clean_chain_after_appends() {
    let (_dir, log, _db) = open_log();
    append_some(&log, 5);
    let result = verify(&log).unwrap();
    assert!(result.valid, "reason: {:?}", result.reason);
    assert_eq!(result.event_count, 5);
    assert!(result.first_bad_seq.is_none());
}

#[test]
fn test_verify_empty_log_is_uninitialized() {
    let (_dir, log, _db) = open_log();
    // No events, no chain head yet.
    let store = log.store_arc();
    assert!(store.chain_state("main").unwrap().is_none());
    let result = verify(&log).unwrap();
    assert!(!result.valid);
    assert_eq!(result.reason.as_deref(), Some("chain not initialized"));
}

#[test]
fn test_tampered_payload_is_localized() {
    let (_dir, log, db_path) = open_log();
    append_some(&log, 6);

    // Tamper with the payload of the third event, in place.
    let conn = Connection::open(&db_path).unwrap();
    conn.execute(
        "UPDATE events SET payload = '{\"check\":\"lint\",\"n\":999}' WHERE seq = 3",
        [],
    )
    .unwrap();

    let result = verify(&log).unwrap();
    assert!(!result.valid);
    assert_eq!(result.first_bad_seq, Some(3));
}

#[test]
fn test_initialize_recovers_from_unhashed_events() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("state.db");
    let store = Arc::new(SqliteStore::open(&db_path).unwrap());

    // Events appended without chain maintenance have no hashes.
    let bare = EventLog::without_chain(Arc::clone(&store) as Arc<dyn crate::store::Store>);
    for _ in 0..4 {
        bare.append(Event::new(EventType::CheckCompleted, json!({"check": "lint"})))
            .unwrap();
    }

    let log = EventLog::new(store);
    assert!(!verify(&log).unwrap().valid);

    let state = initialize(&log).unwrap();
    // 4 bare events plus the tamper-detected verification event.
    assert_eq!(state.event_count, 5);
    assert!(verify(&log).unwrap().valid);
}

#[test]
fn test_verification_emits_chain_events() {
    let (_dir, log, _db) = open_log();
    append_some(&log, 2);
    verify(&log).unwrap();
    let verified = log.latest_of(EventType::ChainVerified, None).unwrap();
    assert!(verified.is_some());
}
