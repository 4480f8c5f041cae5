//! Tests for the event log facade.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use super::EventLog;
use crate::event::{Event, EventType};
use crate::intent::{Intent, Status};
use crate::store::{EventFilter, SqliteStore, Store};

fn open_log() -> (TempDir, EventLog) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("state.db")).unwrap());
    (dir, EventLog::new(store))
}

fn created_event(intent: &Intent) -> Event {
    Event::new(EventType::IntentCreated, json!({"intent": intent}))
        .with_intent(intent.id.clone())
}

fn status_event(event_type: EventType, intent_id: &str, retries: Option<u32>) -> Event {
    let payload = retries.map_or_else(|| json!({}), |r| json!({"retries": r}));
    Event::new(event_type, payload).with_intent(intent_id)
}

#[test]
fn test_append_materializes_intent_created() {
    let (_dir, log) = open_log();
    let intent = Intent::new("feature/a", "main");
    log.append(created_event(&intent)).unwrap();

    let stored = log.store().get_intent(&intent.id).unwrap().unwrap();
    assert_eq!(stored.status, Status::Ready);
    assert_eq!(stored.source, "feature/a");
}

#[test]
fn test_lifecycle_events_drive_status() {
    let (_dir, log) = open_log();
    let intent = Intent::new("feature/a", "main");
    log.append(created_event(&intent)).unwrap();

    log.append(status_event(EventType::IntentValidated, &intent.id, None))
        .unwrap();
    assert_eq!(
        log.store().get_intent(&intent.id).unwrap().unwrap().status,
        Status::Validated
    );

    log.append(status_event(EventType::IntentRequeued, &intent.id, Some(1)))
        .unwrap();
    let back = log.store().get_intent(&intent.id).unwrap().unwrap();
    assert_eq!(back.status, Status::Ready);
    assert_eq!(back.retries, 1);

    log.append(status_event(EventType::IntentRejected, &intent.id, Some(3)))
        .unwrap();
    let back = log.store().get_intent(&intent.id).unwrap().unwrap();
    assert_eq!(back.status, Status::Rejected);
    assert_eq!(back.retries, 3);
}

#[test]
fn test_status_changed_event_carries_explicit_status() {
    let (_dir, log) = open_log();
    let mut intent = Intent::new("feature/a", "main");
    intent.status = Status::Validated;
    log.append(created_event(&intent)).unwrap();

    log.append(
        Event::new(EventType::IntentStatusChanged, json!({"status": "QUEUED"}))
            .with_intent(intent.id.clone()),
    )
    .unwrap();
    assert_eq!(
        log.store().get_intent(&intent.id).unwrap().unwrap().status,
        Status::Queued
    );
}

#[test]
fn test_append_assigns_chain_hashes() {
    let (_dir, log) = open_log();
    log.append(Event::new(EventType::QueueProcessed, json!({"processed": 0})))
        .unwrap();
    log.append(Event::new(EventType::QueueProcessed, json!({"processed": 1})))
        .unwrap();

    let events = log
        .query(&EventFilter::default().oldest_first())
        .unwrap();
    assert!(events.iter().all(|e| e.hash.is_some()));
    let head = log.store().chain_state("main").unwrap().unwrap();
    assert_eq!(head.event_count, 2);
    assert_eq!(head.last_hash, events[1].hash.clone().unwrap());
}

#[test]
fn test_replay_reconstructs_intent_table() {
    let (_dir, log) = open_log();
    let a = Intent::new("feature/a", "main");
    let mut b = Intent::new("feature/b", "main");
    b.priority = 1;

    log.append(created_event(&a)).unwrap();
    log.append(created_event(&b)).unwrap();
    log.append(status_event(EventType::IntentValidated, &a.id, None))
        .unwrap();
    log.append(status_event(EventType::IntentMerged, &a.id, None))
        .unwrap();
    log.append(status_event(EventType::IntentRequeued, &b.id, Some(2)))
        .unwrap();

    let before: Vec<Intent> = log.store().list_intents(None, None, 10).unwrap();

    let applied = log.replay().unwrap();
    assert_eq!(applied, 5);

    let after: Vec<Intent> = log.store().list_intents(None, None, 10).unwrap();
    assert_eq!(before.len(), after.len());
    for (x, y) in before.iter().zip(after.iter()) {
        assert_eq!(x.id, y.id);
        assert_eq!(x.status, y.status);
        assert_eq!(x.retries, y.retries);
        assert_eq!(x.priority, y.priority);
        assert_eq!(x.created_at, y.created_at);
    }
}

#[test]
fn test_materialize_ignores_unknown_payload_shapes() {
    let (_dir, log) = open_log();
    // No "intent" key; materialization must not fail.
    log.append(Event::new(EventType::IntentCreated, json!({"oops": true})))
        .unwrap();
    assert!(log.store().list_intents(None, None, 10).unwrap().is_empty());
}

#[test]
fn test_latest_of_scoped_to_intent() {
    let (_dir, log) = open_log();
    log.append(
        Event::new(EventType::RiskEvaluated, json!({"risk_score": 10.0})).with_intent("i1"),
    )
    .unwrap();
    log.append(
        Event::new(EventType::RiskEvaluated, json!({"risk_score": 99.0})).with_intent("i2"),
    )
    .unwrap();
    let latest = log.latest_of(EventType::RiskEvaluated, Some("i1")).unwrap().unwrap();
    assert_eq!(latest.payload["risk_score"], 10.0);
}
