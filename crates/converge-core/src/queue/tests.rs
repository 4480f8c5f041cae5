//! Tests for the queue processor.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use super::{QUEUE_LOCK_NAME, QueueAction, QueueError, QueueOptions, QueueProcessor, reset_queue};
use crate::check::CheckRunner;
use crate::engine::Engine;
use crate::engine::tests::{MockScm, test_flags};
use crate::event::{Event, EventType};
use crate::intake::IntakeMode;
use crate::intent::{Intent, RiskLevel, Status};
use crate::log::EventLog;
use crate::policy::PolicyConfig;
use crate::review::{ReviewDecision, ReviewStatus, ReviewTask};
use crate::scm::{Scm, Simulation};
use crate::store::{EventFilter, SqliteStore};

struct Fixture {
    _dir: TempDir,
    log: Arc<EventLog>,
    scm: Arc<MockScm>,
    engine: Engine,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("state.db")).unwrap());
    let log = Arc::new(EventLog::new(store));
    let scm = Arc::new(MockScm::new());
    let mut checks = CheckRunner::empty();
    checks.register("lint", "true", &[]);
    let engine = Engine::new(
        Arc::clone(&log),
        Arc::clone(&scm) as Arc<dyn Scm>,
        PolicyConfig::default(),
    )
    .with_checks(checks)
    .with_flags(test_flags());
    Fixture {
        _dir: dir,
        log,
        scm,
        engine,
    }
}

fn options(auto_confirm: bool) -> QueueOptions {
    QueueOptions {
        auto_confirm,
        ..QueueOptions::default()
    }
}

/// Seeds a VALIDATED intent with a clean one-file simulation.
fn seed_validated(fix: &Fixture, source: &str, deps: &[&str]) -> Intent {
    let mut intent = Intent::new(source, "main");
    intent.status = Status::Validated;
    intent.dependencies = deps.iter().map(|d| (*d).to_string()).collect();
    fix.log
        .append(
            Event::new(EventType::IntentCreated, json!({"intent": intent}))
                .with_intent(intent.id.clone()),
        )
        .unwrap();
    fix.scm.set_simulation(
        source,
        Simulation::clean(source, "main", &["src/auth/a.rs"]),
    );
    intent
}

fn status_of(fix: &Fixture, id: &str) -> Status {
    fix.log.store().get_intent(id).unwrap().unwrap().status
}

// =============================================================================
// Happy path
// =============================================================================

#[test]
fn test_validated_intent_is_queued_without_auto_confirm() {
    let fix = fixture();
    let intent = seed_validated(&fix, "feature/a", &[]);

    let processor = QueueProcessor::new(&fix.engine, options(false));
    let results = processor.process().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].action, QueueAction::Queued);
    assert_eq!(status_of(&fix, &intent.id), Status::Queued);

    // The pass footer event is always emitted.
    let processed = fix
        .log
        .query(&EventFilter::of_type(EventType::QueueProcessed))
        .unwrap();
    assert_eq!(processed.len(), 1);
}

#[test]
fn test_auto_confirm_merges_and_shares_validation_trace() {
    let fix = fixture();
    let intent = seed_validated(&fix, "feature/a", &[]);

    let processor = QueueProcessor::new(&fix.engine, options(true));
    let results = processor.process().unwrap();
    assert_eq!(results[0].action, QueueAction::Merged);
    assert_eq!(status_of(&fix, &intent.id), Status::Merged);

    // The merge event carries the trace of the revalidation that
    // admitted it, and that trace contains the INTENT_VALIDATED event.
    let merged = fix
        .log
        .latest_of(EventType::IntentMerged, Some(&intent.id))
        .unwrap()
        .unwrap();
    let trace_events = fix
        .log
        .query(&EventFilter {
            trace_id: Some(merged.trace_id.clone()),
            ascending: true,
            ..EventFilter::default()
        })
        .unwrap();
    assert!(
        trace_events
            .iter()
            .any(|e| e.event.event_type == EventType::IntentValidated)
    );
}

// =============================================================================
// Dependency ordering
// =============================================================================

#[test]
fn test_dependency_ordering_across_two_passes() {
    let fix = fixture();
    let first = seed_validated(&fix, "feature/one", &[]);
    let second = seed_validated(&fix, "feature/two", &[&first.id]);

    // Pass 1: the dependency snapshot predates any merge, so the
    // dependent is blocked even though its dependency merges in the
    // same pass.
    let processor = QueueProcessor::new(&fix.engine, options(true));
    let results = processor.process().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].action, QueueAction::Merged);
    assert_eq!(results[1].action, QueueAction::DependencyBlocked);
    assert_eq!(status_of(&fix, &second.id), Status::Validated);

    let dep_blocked = fix
        .log
        .latest_of(EventType::IntentDependencyBlocked, Some(&second.id))
        .unwrap()
        .unwrap();
    assert_eq!(dep_blocked.payload["dependency"], first.id.as_str());

    // Pass 2: the dependency is merged; the dependent follows.
    let results = processor.process().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].action, QueueAction::Merged);
    assert_eq!(status_of(&fix, &second.id), Status::Merged);
}

#[test]
fn test_rejected_dependency_keeps_dependent_skipped() {
    let fix = fixture();
    let dep = seed_validated(&fix, "feature/dep", &[]);
    fix.log
        .append(
            Event::new(EventType::IntentRejected, json!({"reason": "manual"}))
                .with_intent(dep.id.clone()),
        )
        .unwrap();
    let dependent = seed_validated(&fix, "feature/main-change", &[&dep.id]);

    let processor = QueueProcessor::new(&fix.engine, options(true));
    for _ in 0..3 {
        let results = processor.process().unwrap();
        assert_eq!(results[0].action, QueueAction::DependencyBlocked);
    }
    // No auto-reject: the dependent stays VALIDATED, merely skipped.
    assert_eq!(status_of(&fix, &dependent.id), Status::Validated);
}

// =============================================================================
// Retry discipline
// =============================================================================

#[test]
fn test_blocked_revalidation_requeues_then_rejects() {
    let fix = fixture();
    let intent = seed_validated(&fix, "feature/flaky", &[]);

    // Conflicts appear on revalidation: every pass blocks.
    let mut sim = Simulation::clean("feature/flaky", "main", &["src/a.rs"]);
    sim.mergeable = false;
    sim.conflicts = vec!["src/a.rs".to_string()];
    fix.scm.set_simulation("feature/flaky", sim);

    let processor = QueueProcessor::new(&fix.engine, options(false));

    // Pass 1: retries 0 → 1, back to READY.
    let results = processor.process().unwrap();
    assert_eq!(results[0].action, QueueAction::Requeued);
    assert_eq!(status_of(&fix, &intent.id), Status::Ready);
    let stored = fix.log.store().get_intent(&intent.id).unwrap().unwrap();
    assert_eq!(stored.retries, 1);

    // Simulate an external actor returning it to VALIDATED between
    // passes (the flake cleared elsewhere).
    fix.log
        .store()
        .update_intent_status(&intent.id, Status::Validated, None)
        .unwrap();
    let results = processor.process().unwrap();
    assert_eq!(results[0].action, QueueAction::Requeued);
    assert_eq!(fix.log.store().get_intent(&intent.id).unwrap().unwrap().retries, 2);

    // Third blocked pass hits the bound: REJECTED, terminal.
    fix.log
        .store()
        .update_intent_status(&intent.id, Status::Validated, None)
        .unwrap();
    let results = processor.process().unwrap();
    assert_eq!(results[0].action, QueueAction::Rejected);
    let stored = fix.log.store().get_intent(&intent.id).unwrap().unwrap();
    assert_eq!(stored.status, Status::Rejected);
    assert_eq!(stored.retries, 3);

    let requeued = fix
        .log
        .query(&EventFilter::of_type(EventType::IntentRequeued).for_intent(&intent.id))
        .unwrap();
    assert_eq!(requeued.len(), 2);
    let rejected = fix
        .log
        .query(&EventFilter::of_type(EventType::IntentRejected).for_intent(&intent.id))
        .unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].event.payload["retries"], 3);
}

#[test]
fn test_retry_bound_checked_at_entry() {
    let fix = fixture();
    let intent = seed_validated(&fix, "feature/a", &[]);
    fix.log
        .store()
        .update_intent_status(&intent.id, Status::Validated, Some(3))
        .unwrap();

    let processor = QueueProcessor::new(&fix.engine, options(false));
    let results = processor.process().unwrap();
    assert_eq!(results[0].action, QueueAction::Rejected);
    assert_eq!(status_of(&fix, &intent.id), Status::Rejected);
}

#[test]
fn test_merge_failure_requeues_with_retry() {
    let fix = fixture();
    let intent = seed_validated(&fix, "feature/a", &[]);
    fix.scm.fail_next_merges(1);

    let processor = QueueProcessor::new(&fix.engine, options(true));
    let results = processor.process().unwrap();
    assert_eq!(results[0].action, QueueAction::MergeFailed);

    let stored = fix.log.store().get_intent(&intent.id).unwrap().unwrap();
    assert_eq!(stored.status, Status::Ready);
    assert_eq!(stored.retries, 1);
    assert!(
        fix.log
            .latest_of(EventType::IntentMergeFailed, Some(&intent.id))
            .unwrap()
            .is_some()
    );
}

// =============================================================================
// Review gating
// =============================================================================

fn seed_review(fix: &Fixture, intent_id: &str, status: ReviewStatus, decision: Option<ReviewDecision>) {
    let now = chrono::Utc::now();
    fix.log
        .store()
        .upsert_review_task(&ReviewTask {
            id: format!("rev-{intent_id}"),
            intent_id: intent_id.to_string(),
            status,
            decision,
            reviewer: None,
            trigger: "policy".to_string(),
            risk_level: RiskLevel::Medium,
            sla_deadline: now + chrono::Duration::hours(48),
            created_at: now,
            updated_at: now,
            tenant_id: None,
        })
        .unwrap();
}

#[test]
fn test_pending_review_defers_intent() {
    let fix = fixture();
    let intent = seed_validated(&fix, "feature/a", &[]);
    seed_review(&fix, &intent.id, ReviewStatus::Pending, None);

    let processor = QueueProcessor::new(&fix.engine, options(true));
    let results = processor.process().unwrap();
    assert_eq!(results[0].action, QueueAction::ReviewPending);
    assert_eq!(status_of(&fix, &intent.id), Status::Validated);
}

#[test]
fn test_rejected_review_rejects_intent() {
    let fix = fixture();
    let intent = seed_validated(&fix, "feature/a", &[]);
    seed_review(
        &fix,
        &intent.id,
        ReviewStatus::Completed,
        Some(ReviewDecision::Rejected),
    );

    let processor = QueueProcessor::new(&fix.engine, options(true));
    let results = processor.process().unwrap();
    assert_eq!(results[0].action, QueueAction::Rejected);
    assert_eq!(status_of(&fix, &intent.id), Status::Rejected);
}

#[test]
fn test_approved_review_does_not_block() {
    let fix = fixture();
    let intent = seed_validated(&fix, "feature/a", &[]);
    seed_review(
        &fix,
        &intent.id,
        ReviewStatus::Completed,
        Some(ReviewDecision::Approved),
    );

    let processor = QueueProcessor::new(&fix.engine, options(true));
    let results = processor.process().unwrap();
    assert_eq!(results[0].action, QueueAction::Merged);
    assert_eq!(status_of(&fix, &intent.id), Status::Merged);
}

// =============================================================================
// Intake mode
// =============================================================================

#[test]
fn test_pause_mode_defers_non_critical() {
    let fix = fixture();
    let normal = seed_validated(&fix, "feature/a", &[]);
    let mut critical = seed_validated(&fix, "feature/hotfix", &[]);
    critical.risk_level = RiskLevel::Critical;
    fix.log.store().upsert_intent(&critical).unwrap();

    let mut opts = options(false);
    opts.intake_mode = IntakeMode::Pause;
    let processor = QueueProcessor::new(&fix.engine, opts);
    let results = processor.process().unwrap();

    let by_id: std::collections::HashMap<&str, QueueAction> = results
        .iter()
        .map(|r| (r.intent_id.as_str(), r.action))
        .collect();
    assert_eq!(by_id[normal.id.as_str()], QueueAction::Skipped);
    // The critical intent proceeds through revalidation (auto-classify
    // settles its level down for this small change) and is queued.
    assert_eq!(by_id[critical.id.as_str()], QueueAction::Queued);
}

// =============================================================================
// Lock exclusivity
// =============================================================================

#[test]
fn test_lock_held_by_another_processor() {
    let fix = fixture();
    seed_validated(&fix, "feature/a", &[]);
    fix.log
        .store()
        .acquire_queue_lock(QUEUE_LOCK_NAME, "pid:other", Duration::from_secs(300))
        .unwrap();

    let processor = QueueProcessor::new(&fix.engine, options(false));
    let err = processor.process().unwrap_err();
    assert!(matches!(err, QueueError::LockHeld { .. }));

    // Nothing was processed while locked out.
    let processed = fix
        .log
        .query(&EventFilter::of_type(EventType::QueueProcessed))
        .unwrap();
    assert!(processed.is_empty());
}

#[test]
fn test_lock_released_after_pass() {
    let fix = fixture();
    let processor = QueueProcessor::new(&fix.engine, options(false));
    processor.process().unwrap();
    assert!(fix.log.store().queue_lock_info(QUEUE_LOCK_NAME).unwrap().is_none());
    // A second pass acquires cleanly.
    processor.process().unwrap();
}

// =============================================================================
// Administrative reset
// =============================================================================

#[test]
fn test_reset_queue_clears_retries_and_lock() {
    let fix = fixture();
    let intent = seed_validated(&fix, "feature/a", &[]);
    fix.log
        .store()
        .update_intent_status(&intent.id, Status::Ready, Some(2))
        .unwrap();
    fix.log
        .store()
        .acquire_queue_lock(QUEUE_LOCK_NAME, "pid:stale", Duration::from_secs(300))
        .unwrap();

    reset_queue(&fix.log, &intent.id, Some(Status::Validated), true).unwrap();

    let stored = fix.log.store().get_intent(&intent.id).unwrap().unwrap();
    assert_eq!(stored.status, Status::Validated);
    assert_eq!(stored.retries, 0);
    assert!(fix.log.store().queue_lock_info(QUEUE_LOCK_NAME).unwrap().is_none());
}
