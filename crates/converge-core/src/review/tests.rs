//! Tests for the review workflow.

use std::sync::Arc;

use serde_json::json;

use super::{
    ReviewDecision, ReviewStatus, assign_review, cancel_review, complete_review,
    escalate_sla_breaches, has_pending_reviews, has_rejected_review, request_review, sla_hours,
};
use crate::event::{Event, EventType};
use crate::intent::{Intent, RiskLevel};
use crate::log::EventLog;
use crate::store::SqliteStore;

fn open_log() -> (tempfile::TempDir, EventLog) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("state.db")).unwrap());
    (dir, EventLog::new(store))
}

fn seed_intent(log: &EventLog, risk_level: RiskLevel) -> Intent {
    let mut intent = Intent::new("feature/a", "main");
    intent.risk_level = risk_level;
    log.append(
        Event::new(EventType::IntentCreated, json!({"intent": intent}))
            .with_intent(intent.id.clone()),
    )
    .unwrap();
    intent
}

#[test]
fn test_sla_hours_by_risk_level() {
    assert_eq!(sla_hours(RiskLevel::Low), 72);
    assert_eq!(sla_hours(RiskLevel::Medium), 48);
    assert_eq!(sla_hours(RiskLevel::High), 24);
    assert_eq!(sla_hours(RiskLevel::Critical), 8);
}

#[test]
fn test_request_review_creates_pending_task() {
    let (_dir, log) = open_log();
    let intent = seed_intent(&log, RiskLevel::High);

    let task = request_review(&log, &intent.id, "policy", None).unwrap();
    assert_eq!(task.status, ReviewStatus::Pending);
    assert_eq!(task.risk_level, RiskLevel::High);
    assert!(task.id.starts_with("rev-"));

    // The task materialized into the store and blocks the queue.
    let stored = log.store().get_review_task(&task.id).unwrap().unwrap();
    assert_eq!(stored.status, ReviewStatus::Pending);
    assert!(has_pending_reviews(log.store(), &intent.id).unwrap());
    assert!(
        log.latest_of(EventType::ReviewRequested, Some(&intent.id))
            .unwrap()
            .is_some()
    );
}

#[test]
fn test_request_with_reviewer_is_assigned() {
    let (_dir, log) = open_log();
    let intent = seed_intent(&log, RiskLevel::Medium);
    let task = request_review(&log, &intent.id, "policy", Some("alice")).unwrap();
    assert_eq!(task.status, ReviewStatus::Assigned);
    assert!(
        log.latest_of(EventType::ReviewAssigned, Some(&intent.id))
            .unwrap()
            .is_some()
    );
}

#[test]
fn test_request_review_unknown_intent_fails() {
    let (_dir, log) = open_log();
    assert!(request_review(&log, "ghost", "policy", None).is_err());
}

#[test]
fn test_assign_then_complete_approved() {
    let (_dir, log) = open_log();
    let intent = seed_intent(&log, RiskLevel::Medium);
    let task = request_review(&log, &intent.id, "policy", None).unwrap();

    assign_review(&log, &task.id, "bob").unwrap();
    let completed = complete_review(&log, &task.id, ReviewDecision::Approved, "lgtm").unwrap();
    assert_eq!(completed.status, ReviewStatus::Completed);
    assert_eq!(completed.decision, Some(ReviewDecision::Approved));

    assert!(!has_pending_reviews(log.store(), &intent.id).unwrap());
    assert!(!has_rejected_review(log.store(), &intent.id).unwrap());
}

#[test]
fn test_rejected_completion_flags_intent() {
    let (_dir, log) = open_log();
    let intent = seed_intent(&log, RiskLevel::Medium);
    let task = request_review(&log, &intent.id, "policy", None).unwrap();
    complete_review(&log, &task.id, ReviewDecision::Rejected, "unsafe").unwrap();
    assert!(has_rejected_review(log.store(), &intent.id).unwrap());
}

#[test]
fn test_cancel_clears_pending() {
    let (_dir, log) = open_log();
    let intent = seed_intent(&log, RiskLevel::Medium);
    let task = request_review(&log, &intent.id, "policy", None).unwrap();
    cancel_review(&log, &task.id, "obsolete").unwrap();
    assert!(!has_pending_reviews(log.store(), &intent.id).unwrap());
}

#[test]
fn test_escalation_on_sla_breach() {
    let (_dir, log) = open_log();
    let intent = seed_intent(&log, RiskLevel::Critical);
    let task = request_review(&log, &intent.id, "policy", None).unwrap();

    // Age the deadline past now.
    let mut aged = task.clone();
    aged.sla_deadline = chrono::Utc::now() - chrono::Duration::hours(1);
    log.store().upsert_review_task(&aged).unwrap();

    let escalated = escalate_sla_breaches(&log).unwrap();
    assert_eq!(escalated.len(), 1);
    assert_eq!(escalated[0].status, ReviewStatus::Escalated);
    // An escalated task still blocks the queue.
    assert!(has_pending_reviews(log.store(), &intent.id).unwrap());
    assert!(
        log.latest_of(EventType::ReviewEscalated, Some(&intent.id))
            .unwrap()
            .is_some()
    );
}

#[test]
fn test_escalation_skips_fresh_tasks() {
    let (_dir, log) = open_log();
    let intent = seed_intent(&log, RiskLevel::Low);
    request_review(&log, &intent.id, "policy", None).unwrap();
    assert!(escalate_sla_breaches(&log).unwrap().is_empty());
}
