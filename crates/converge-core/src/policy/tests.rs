//! Tests for the policy engine.

use std::collections::BTreeSet;

use serde_json::json;

use super::{
    GateEvidence, GateName, PolicyConfig, PolicyVerdict, RiskGateMode, calibrate_profiles,
    evaluate, evaluate_risk_gate, rollout_bucket,
};
use crate::intent::{Intent, OriginType, RiskLevel};
use crate::risk::evaluate_risk;
use crate::scm::Simulation;

fn passing_evidence(checks: &[&str]) -> GateEvidence {
    GateEvidence {
        checks_passed: checks.iter().map(|c| (*c).to_string()).collect(),
        checks_required_extra: BTreeSet::new(),
        containment_score: 0.9,
        entropy_score: 4.0,
        security_critical: 0,
        security_high: 0,
        coherence_score: 90.0,
    }
}

// =============================================================================
// Profiles and config
// =============================================================================

#[test]
fn test_default_profiles_match_table() {
    let config = PolicyConfig::default();
    let low = config.profile(RiskLevel::Low);
    assert!((low.entropy_budget - 25.0).abs() < f64::EPSILON);
    assert!((low.containment_min - 0.30).abs() < f64::EPSILON);
    assert_eq!(low.security.max_high, 5);
    assert_eq!(low.checks, vec!["lint"]);

    let high = config.profile(RiskLevel::High);
    assert!((high.entropy_budget - 12.0).abs() < f64::EPSILON);
    assert_eq!(high.security.max_high, 0);
    assert_eq!(high.checks, vec!["lint", "unit_tests"]);

    let critical = config.profile(RiskLevel::Critical);
    assert!((critical.containment_min - 0.85).abs() < f64::EPSILON);
    assert!((critical.coherence_pass - 85.0).abs() < f64::EPSILON);
}

#[test]
fn test_every_profile_bans_critical_findings() {
    let config = PolicyConfig::default();
    for level in RiskLevel::ALL {
        assert_eq!(config.profile(level).security.max_critical, 0, "{level}");
    }
}

#[test]
fn test_config_load_overlay_and_precedence() {
    let dir = tempfile::tempdir().unwrap();
    let explicit = dir.path().join("custom.json");
    std::fs::write(
        &explicit,
        json!({
            "profiles": {"medium": {"entropy_budget": 22.5}},
            "queue": {"max_retries": 5, "default_target": "trunk"},
            "risk": {"mode": "enforce", "enforce_ratio": 0.25},
        })
        .to_string(),
    )
    .unwrap();

    let config = PolicyConfig::load(Some(&explicit)).unwrap();
    assert!((config.profile(RiskLevel::Medium).entropy_budget - 22.5).abs() < f64::EPSILON);
    // Untouched fields keep their defaults.
    assert!((config.profile(RiskLevel::Medium).containment_min - 0.5).abs() < f64::EPSILON);
    assert_eq!(config.queue.max_retries, 5);
    assert_eq!(config.queue.default_target, "trunk");
    assert_eq!(config.risk.mode, RiskGateMode::Enforce);
    assert!((config.risk.enforce_ratio - 0.25).abs() < f64::EPSILON);
}

#[test]
fn test_config_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = PolicyConfig::load(Some(&dir.path().join("absent.json"))).unwrap();
    assert_eq!(config, PolicyConfig::default());
}

#[test]
fn test_config_rejects_bad_enforce_ratio() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, json!({"risk": {"enforce_ratio": 1.5}}).to_string()).unwrap();
    assert!(PolicyConfig::load(Some(&path)).is_err());
}

#[test]
fn test_config_rejects_malformed_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{not json").unwrap();
    assert!(PolicyConfig::load(Some(&path)).is_err());
}

#[test]
fn test_origin_override_specific_level() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("origins.json");
    std::fs::write(
        &path,
        json!({
            "origin_overrides": {
                "agent": {
                    "high": {"checks": ["lint", "unit_tests", "integration_tests"]},
                    "_default": {"containment_min": 0.9},
                },
            },
        })
        .to_string(),
    )
    .unwrap();
    let config = PolicyConfig::load(Some(&path)).unwrap();

    // Specific level wins over _default.
    let agent_high = config.profile_for(RiskLevel::High, OriginType::Agent);
    assert_eq!(agent_high.checks.len(), 3);
    assert!((agent_high.containment_min - 0.70).abs() < f64::EPSILON);

    // Other levels fall back to _default.
    let agent_low = config.profile_for(RiskLevel::Low, OriginType::Agent);
    assert!((agent_low.containment_min - 0.9).abs() < f64::EPSILON);

    // Other origins are untouched.
    let human_high = config.profile_for(RiskLevel::High, OriginType::Human);
    assert_eq!(human_high.checks.len(), 2);
}

// =============================================================================
// Gates
// =============================================================================

#[test]
fn test_all_gates_pass() {
    let config = PolicyConfig::default();
    let profile = config.profile(RiskLevel::Low);
    let evaluation = evaluate(profile, "low", &passing_evidence(&["lint"]));
    assert_eq!(evaluation.verdict, PolicyVerdict::Allow);
    assert_eq!(evaluation.gates.len(), 5);
    assert!(evaluation.first_failure().is_none());
}

#[test]
fn test_verification_gate_reports_missing_checks() {
    let config = PolicyConfig::default();
    let profile = config.profile(RiskLevel::High);
    let evaluation = evaluate(profile, "high", &passing_evidence(&["lint"]));
    assert_eq!(evaluation.verdict, PolicyVerdict::Block);
    let failure = evaluation.first_failure().unwrap();
    assert_eq!(failure.gate, GateName::Verification);
    assert!(failure.reason.contains("unit_tests"));
}

#[test]
fn test_intent_extra_checks_union_with_profile() {
    let config = PolicyConfig::default();
    let profile = config.profile(RiskLevel::Low);
    let mut evidence = passing_evidence(&["lint"]);
    evidence.checks_required_extra.insert("contract_tests".to_string());
    let evaluation = evaluate(profile, "low", &evidence);
    assert_eq!(evaluation.verdict, PolicyVerdict::Block);

    evidence.checks_passed.insert("contract_tests".to_string());
    let evaluation = evaluate(profile, "low", &evidence);
    assert_eq!(evaluation.verdict, PolicyVerdict::Allow);
}

#[test]
fn test_containment_gate_blocks_below_floor() {
    let config = PolicyConfig::default();
    let profile = config.profile(RiskLevel::Critical);
    let mut evidence = passing_evidence(&["lint", "unit_tests"]);
    evidence.containment_score = 0.80;
    let evaluation = evaluate(profile, "critical", &evidence);
    let failure = evaluation.first_failure().unwrap();
    assert_eq!(failure.gate, GateName::Containment);
    assert!((failure.threshold - 0.85).abs() < f64::EPSILON);
}

#[test]
fn test_entropy_gate_blocks_over_budget() {
    let config = PolicyConfig::default();
    let profile = config.profile(RiskLevel::Medium);
    let mut evidence = passing_evidence(&["lint"]);
    evidence.entropy_score = 19.0;
    let evaluation = evaluate(profile, "medium", &evidence);
    let failure = evaluation.first_failure().unwrap();
    assert_eq!(failure.gate, GateName::Entropy);
}

#[test]
fn test_security_gate_scenario_high_risk_one_high_finding() {
    // At HIGH risk, a single high finding blocks: max_high is 0.
    let config = PolicyConfig::default();
    let profile = config.profile(RiskLevel::High);
    let mut evidence = passing_evidence(&["lint", "unit_tests"]);
    evidence.security_high = 1;
    let evaluation = evaluate(profile, "high", &evidence);
    let failure = evaluation.first_failure().unwrap();
    assert_eq!(failure.gate, GateName::Security);
    assert!((failure.value - 1.0).abs() < f64::EPSILON);
    assert!((failure.threshold - 0.0).abs() < f64::EPSILON);
}

#[test]
fn test_coherence_gate_passes_warn_band() {
    let config = PolicyConfig::default();
    let profile = config.profile(RiskLevel::Low);
    let mut evidence = passing_evidence(&["lint"]);
    evidence.coherence_score = 65.0; // Below pass (75), above warn (60).
    let evaluation = evaluate(profile, "low", &evidence);
    assert_eq!(evaluation.verdict, PolicyVerdict::Allow);

    evidence.coherence_score = 55.0;
    let evaluation = evaluate(profile, "low", &evidence);
    let failure = evaluation.first_failure().unwrap();
    assert_eq!(failure.gate, GateName::Coherence);
}

#[test]
fn test_all_gates_computed_even_when_first_fails() {
    let config = PolicyConfig::default();
    let profile = config.profile(RiskLevel::High);
    let mut evidence = passing_evidence(&[]);
    evidence.containment_score = 0.1;
    evidence.entropy_score = 90.0;
    let evaluation = evaluate(profile, "high", &evidence);
    assert_eq!(evaluation.gates.len(), 5);
    assert!(evaluation.gates.iter().filter(|g| !g.passed).count() >= 3);
}

#[test]
fn test_gate_evaluation_is_pure() {
    let config = PolicyConfig::default();
    let profile = config.profile(RiskLevel::Medium);
    let evidence = passing_evidence(&["lint"]);
    let a = evaluate(profile, "medium", &evidence);
    let b = evaluate(profile, "medium", &evidence);
    assert_eq!(a, b);
}

// =============================================================================
// Risk gate
// =============================================================================

fn risk_eval(risk: f64, damage: f64, propagation: f64) -> crate::risk::RiskEval {
    let intent = Intent::new("feature/a", "main");
    let sim = Simulation::clean("feature/a", "main", &["src/a.rs"]);
    let mut eval = evaluate_risk(&intent, &sim, &[]);
    eval.risk_score = risk;
    eval.damage_score = damage;
    eval.propagation_score = propagation;
    eval
}

#[test]
fn test_rollout_bucket_deterministic_and_bounded() {
    let a = rollout_bucket("intent-001");
    let b = rollout_bucket("intent-001");
    assert!((a - b).abs() < f64::EPSILON);
    assert!((0.0..1.0).contains(&a));
    // Different ids land in different buckets (overwhelmingly).
    assert!((rollout_bucket("intent-002") - a).abs() > f64::EPSILON);
}

#[test]
fn test_shadow_mode_records_but_never_blocks() {
    let config = super::RiskGateConfig::default();
    let outcome = evaluate_risk_gate(&config, &risk_eval(90.0, 90.0, 90.0), "i-shadow");
    assert!(outcome.would_block);
    assert!(!outcome.enforced);
    assert_eq!(outcome.breaches.len(), 3);
}

#[test]
fn test_enforce_mode_full_ratio_blocks_breaches() {
    let config = super::RiskGateConfig {
        mode: RiskGateMode::Enforce,
        ..super::RiskGateConfig::default()
    };
    let outcome = evaluate_risk_gate(&config, &risk_eval(70.0, 10.0, 10.0), "i-enforce");
    assert!(outcome.would_block);
    assert!(outcome.enforced);
    assert_eq!(outcome.breaches[0].metric, "risk_score");
}

#[test]
fn test_enforce_ratio_zero_never_blocks() {
    let config = super::RiskGateConfig {
        mode: RiskGateMode::Enforce,
        enforce_ratio: 0.0,
        ..super::RiskGateConfig::default()
    };
    let outcome = evaluate_risk_gate(&config, &risk_eval(99.0, 99.0, 99.0), "i-zero");
    assert!(outcome.would_block);
    assert!(!outcome.enforced);
    assert!(!outcome.in_enforcement_group);
}

#[test]
fn test_no_breach_no_block_in_any_mode() {
    for mode in [RiskGateMode::Shadow, RiskGateMode::Enforce] {
        let config = super::RiskGateConfig {
            mode,
            ..super::RiskGateConfig::default()
        };
        let outcome = evaluate_risk_gate(&config, &risk_eval(10.0, 10.0, 10.0), "i-ok");
        assert!(!outcome.would_block);
        assert!(!outcome.enforced);
    }
}

// =============================================================================
// Calibration
// =============================================================================

#[test]
fn test_calibration_from_percentiles() {
    let config = PolicyConfig::default();
    // 100 samples: entropy scores 0..100.
    let history: Vec<f64> = (0..100).map(f64::from).collect();
    let calibrated = calibrate_profiles(&config.profiles, &history);

    // P75 = 75 → low = 1.5·75 = 112.5, medium = 75; P90 = 90; P95·0.8 = 76.
    assert!((calibrated["low"].entropy_budget - 112.5).abs() < f64::EPSILON);
    assert!((calibrated["medium"].entropy_budget - 75.0).abs() < f64::EPSILON);
    assert!((calibrated["high"].entropy_budget - 90.0).abs() < f64::EPSILON);
    assert!((calibrated["critical"].entropy_budget - 76.0).abs() < f64::EPSILON);
}

#[test]
fn test_calibration_floors_hold_on_quiet_history() {
    let config = PolicyConfig::default();
    let history = vec![0.5, 1.0, 1.5, 2.0];
    let calibrated = calibrate_profiles(&config.profiles, &history);
    assert!((calibrated["low"].entropy_budget - 10.0).abs() < f64::EPSILON);
    assert!((calibrated["medium"].entropy_budget - 8.0).abs() < f64::EPSILON);
    assert!((calibrated["high"].entropy_budget - 5.0).abs() < f64::EPSILON);
    assert!((calibrated["critical"].entropy_budget - 3.0).abs() < f64::EPSILON);
}

#[test]
fn test_calibration_empty_history_is_identity() {
    let config = PolicyConfig::default();
    let calibrated = calibrate_profiles(&config.profiles, &[]);
    assert_eq!(calibrated, config.profiles);
}

#[test]
fn test_calibration_leaves_other_fields_alone() {
    let config = PolicyConfig::default();
    let history: Vec<f64> = (0..100).map(f64::from).collect();
    let calibrated = calibrate_profiles(&config.profiles, &history);
    assert_eq!(calibrated["high"].checks, config.profiles["high"].checks);
    assert!(
        (calibrated["high"].containment_min - config.profiles["high"].containment_min).abs()
            < f64::EPSILON
    );
}
