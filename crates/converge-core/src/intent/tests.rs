//! Tests for the intent module.

use std::collections::HashMap;

use serde_json::json;

use super::{Intent, IntentError, OriginType, RiskLevel, Status, ensure_acyclic};

fn intent_with_deps(id: &str, deps: &[&str]) -> Intent {
    let mut intent = Intent::new("feature/x", "main");
    intent.id = id.to_string();
    intent.dependencies = deps.iter().map(|d| (*d).to_string()).collect();
    intent
}

// =============================================================================
// Status state machine
// =============================================================================

#[test]
fn test_status_walk_happy_path() {
    assert!(Status::Draft.can_transition_to(Status::Ready));
    assert!(Status::Ready.can_transition_to(Status::Validated));
    assert!(Status::Validated.can_transition_to(Status::Queued));
    assert!(Status::Queued.can_transition_to(Status::Merged));
}

#[test]
fn test_status_rejected_from_any_non_terminal() {
    for from in [
        Status::Draft,
        Status::Ready,
        Status::Validated,
        Status::Queued,
    ] {
        assert!(from.can_transition_to(Status::Rejected), "{from} -> REJECTED");
    }
}

#[test]
fn test_status_terminal_states_are_final() {
    for target in [
        Status::Draft,
        Status::Ready,
        Status::Validated,
        Status::Queued,
        Status::Merged,
        Status::Rejected,
    ] {
        assert!(!Status::Merged.can_transition_to(target));
        assert!(!Status::Rejected.can_transition_to(target));
    }
}

#[test]
fn test_status_requeue_paths() {
    // A blocked revalidation returns the intent to READY; so does a
    // failed merge execution.
    assert!(Status::Validated.can_transition_to(Status::Ready));
    assert!(Status::Queued.can_transition_to(Status::Ready));
    assert!(!Status::Merged.can_transition_to(Status::Ready));
}

#[test]
fn test_status_explicit_confirm_from_validated() {
    assert!(Status::Validated.can_transition_to(Status::Merged));
}

#[test]
fn test_status_no_skipping_forward() {
    assert!(!Status::Draft.can_transition_to(Status::Validated));
    assert!(!Status::Ready.can_transition_to(Status::Queued));
    assert!(!Status::Ready.can_transition_to(Status::Merged));
}

#[test]
fn test_status_round_trip() {
    for s in [
        Status::Draft,
        Status::Ready,
        Status::Validated,
        Status::Queued,
        Status::Merged,
        Status::Rejected,
    ] {
        assert_eq!(Status::parse(s.as_str()).unwrap(), s);
    }
    assert!(Status::parse("PENDING").is_err());
}

#[test]
fn test_risk_level_ordering() {
    assert!(RiskLevel::Low < RiskLevel::Medium);
    assert!(RiskLevel::Medium < RiskLevel::High);
    assert!(RiskLevel::High < RiskLevel::Critical);
}

#[test]
fn test_risk_level_round_trip() {
    for level in RiskLevel::ALL {
        assert_eq!(RiskLevel::parse(level.as_str()).unwrap(), level);
    }
    assert!(RiskLevel::parse("extreme").is_err());
}

#[test]
fn test_origin_type_round_trip() {
    for origin in [OriginType::Human, OriginType::Agent, OriginType::Integration] {
        assert_eq!(OriginType::parse(origin.as_str()).unwrap(), origin);
    }
    assert_eq!(OriginType::default(), OriginType::Human);
}

// =============================================================================
// Intent construction and validation
// =============================================================================

#[test]
fn test_new_intent_defaults() {
    let intent = Intent::new("feature/a", "main");
    assert_eq!(intent.status, Status::Ready);
    assert_eq!(intent.risk_level, RiskLevel::Medium);
    assert_eq!(intent.priority, 3);
    assert_eq!(intent.origin_type, OriginType::Human);
    assert_eq!(intent.retries, 0);
    assert_eq!(intent.id.len(), 12);
    assert!(intent.dependencies.is_empty());
}

#[test]
fn test_scope_hints_ordered() {
    let mut intent = Intent::new("feature/a", "main");
    intent.technical = json!({"scope_hint": ["auth", "session"], "affected_modules": ["x"]});
    assert_eq!(intent.scope_hints(), vec!["auth", "session"]);
}

#[test]
fn test_scope_hints_missing_is_empty() {
    let intent = Intent::new("feature/a", "main");
    assert!(intent.scope_hints().is_empty());
}

#[test]
fn test_validate_rejects_self_dependency() {
    let intent = intent_with_deps("i-self", &["i-self"]);
    assert!(matches!(
        intent.validate(),
        Err(IntentError::SelfDependency { .. })
    ));
}

#[test]
fn test_validate_rejects_duplicate_dependency() {
    let intent = intent_with_deps("i-dup", &["a", "b", "a"]);
    assert!(matches!(
        intent.validate(),
        Err(IntentError::DuplicateDependency { .. })
    ));
}

#[test]
fn test_validate_rejects_priority_out_of_range() {
    let mut intent = Intent::new("feature/a", "main");
    intent.priority = 0;
    assert!(matches!(
        intent.validate(),
        Err(IntentError::PriorityOutOfRange { .. })
    ));
    intent.priority = 6;
    assert!(intent.validate().is_err());
}

#[test]
fn test_transition_enforces_state_machine() {
    let mut intent = Intent::new("feature/a", "main");
    assert!(intent.transition(Status::Validated).is_ok());
    assert!(intent.transition(Status::Queued).is_ok());
    let err = intent.transition(Status::Validated).unwrap_err();
    assert!(matches!(err, IntentError::IllegalTransition { .. }));
    assert_eq!(intent.status, Status::Queued);
}

#[test]
fn test_intent_serde_round_trip() {
    let mut intent = Intent::new("feature/a", "main");
    intent.tenant_id = Some("acme".to_string());
    intent.plan_id = Some("p-1".to_string());
    intent.checks_required = vec!["contract_tests".to_string()];
    let text = serde_json::to_string(&intent).unwrap();
    let back: Intent = serde_json::from_str(&text).unwrap();
    assert_eq!(back, intent);
}

// =============================================================================
// Dependency cycle detection
// =============================================================================

fn resolver<'a>(edges: &'a [(&'a str, &'a [&'a str])]) -> impl FnMut(&str) -> Vec<String> + 'a {
    let map: HashMap<String, Vec<String>> = edges
        .iter()
        .map(|(id, deps)| {
            (
                (*id).to_string(),
                deps.iter().map(|d| (*d).to_string()).collect(),
            )
        })
        .collect();
    move |id: &str| map.get(id).cloned().unwrap_or_default()
}

#[test]
fn test_acyclic_chain_passes() {
    let intent = intent_with_deps("a", &["b"]);
    let resolve = resolver(&[("b", &["c"]), ("c", &[])]);
    assert!(ensure_acyclic(&intent, resolve).is_ok());
}

#[test]
fn test_direct_cycle_detected() {
    let intent = intent_with_deps("a", &["b"]);
    let resolve = resolver(&[("b", &["a"])]);
    assert!(matches!(
        ensure_acyclic(&intent, resolve),
        Err(IntentError::DependencyCycle { .. })
    ));
}

#[test]
fn test_transitive_cycle_detected() {
    let intent = intent_with_deps("a", &["b"]);
    let resolve = resolver(&[("b", &["c"]), ("c", &["d"]), ("d", &["b"])]);
    assert!(ensure_acyclic(&intent, resolve).is_err());
}

#[test]
fn test_diamond_is_not_a_cycle() {
    // a -> b, a -> c, b -> d, c -> d: shared dependency, no cycle.
    let intent = intent_with_deps("a", &["b", "c"]);
    let resolve = resolver(&[("b", &["d"]), ("c", &["d"]), ("d", &[])]);
    assert!(ensure_acyclic(&intent, resolve).is_ok());
}

#[test]
fn test_unknown_dependency_resolves_empty() {
    let intent = intent_with_deps("a", &["ghost"]);
    let resolve = resolver(&[]);
    assert!(ensure_acyclic(&intent, resolve).is_ok());
}
