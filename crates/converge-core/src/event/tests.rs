//! Tests for the event module.

use serde_json::json;

use super::{Event, EventType, new_id, new_trace_id};

#[test]
fn test_new_id_is_short_hex() {
    let id = new_id();
    assert_eq!(id.len(), 12);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_new_ids_are_unique() {
    let a = new_id();
    let b = new_id();
    assert_ne!(a, b);
}

#[test]
fn test_trace_id_prefix() {
    assert!(new_trace_id().starts_with("trace-"));
}

#[test]
fn test_event_type_round_trip() {
    let all = [
        EventType::SimulationCompleted,
        EventType::CheckCompleted,
        EventType::RiskEvaluated,
        EventType::RiskLevelReclassified,
        EventType::PolicyEvaluated,
        EventType::IntentCreated,
        EventType::IntentStatusChanged,
        EventType::IntentValidated,
        EventType::IntentBlocked,
        EventType::IntentRequeued,
        EventType::IntentRejected,
        EventType::IntentMerged,
        EventType::IntentMergeFailed,
        EventType::IntentDependencyBlocked,
        EventType::QueueProcessed,
        EventType::QueueReset,
        EventType::ValidationError,
        EventType::SecurityScanStarted,
        EventType::SecurityScanCompleted,
        EventType::SecurityFindingDetected,
        EventType::ReviewRequested,
        EventType::ReviewCompleted,
        EventType::IntakeAccepted,
        EventType::IntakeModeChanged,
        EventType::ChainInitialized,
        EventType::ChainVerified,
        EventType::ChainTamperDetected,
        EventType::CoherenceEvaluated,
        EventType::CoherenceInconsistency,
        EventType::CoherenceBaselineUpdated,
        EventType::FeatureFlagChanged,
        EventType::WorkerStarted,
    ];
    for ty in all {
        assert_eq!(EventType::parse(ty.as_str()).unwrap(), ty);
    }
}

#[test]
fn test_event_type_parse_rejects_unknown() {
    let err = EventType::parse("intent.exploded").unwrap_err();
    assert_eq!(err.value, "intent.exploded");
}

#[test]
fn test_event_type_string_forms_are_dotted_lowercase() {
    assert_eq!(EventType::IntentValidated.as_str(), "intent.validated");
    assert_eq!(
        EventType::ChainTamperDetected.as_str(),
        "audit.chain.tamper_detected"
    );
    assert_eq!(
        EventType::SecurityFindingDetected.as_str(),
        "security.finding.detected"
    );
}

#[test]
fn test_event_builder() {
    let event = Event::new(EventType::IntentBlocked, json!({"reason": "conflicts"}))
        .with_trace("trace-abc")
        .with_intent("i-001")
        .with_tenant(Some("acme".to_string()))
        .with_evidence(json!({"reason": "conflicts"}));

    assert_eq!(event.trace_id, "trace-abc");
    assert_eq!(event.intent_id.as_deref(), Some("i-001"));
    assert_eq!(event.tenant_id.as_deref(), Some("acme"));
    assert_eq!(event.payload["reason"], "conflicts");
    assert_eq!(event.evidence["reason"], "conflicts");
}

#[test]
fn test_event_serde_round_trip() {
    let event = Event::new(EventType::RiskEvaluated, json!({"risk_score": 42.5}))
        .with_intent("i-xyz");
    let text = serde_json::to_string(&event).unwrap();
    let back: Event = serde_json::from_str(&text).unwrap();
    assert_eq!(back, event);
    assert!(text.contains("\"risk.evaluated\""));
}

#[test]
fn test_event_without_intent_omits_field() {
    let event = Event::new(EventType::QueueProcessed, json!({"processed": 0}));
    let text = serde_json::to_string(&event).unwrap();
    assert!(!text.contains("intent_id"));
    assert!(!text.contains("agent_id"));
}
