//! Risk engine: four orthogonal signals, composite scores, bomb
//! detection.
//!
//! Every signal is a 0–100 measurement over the per-intent dependency
//! graph and the merge simulation:
//!
//! - **entropic load**: how much disorder the change introduces
//! - **contextual value**: how important the touched files are
//! - **complexity delta**: net change in structural complexity
//! - **path dependence**: how sensitive the change is to merge order
//!
//! Composites combine the signals into `risk_score` and `damage_score`;
//! `propagation_score` and `containment_score` are complementary
//! structural ratios. Bombs are named degradation patterns (cascade,
//! spiral, thermal death) that surface even when the scalar scores look
//! tame.

mod bombs;
mod eval;
mod signals;


pub use bombs::{Bomb, BombKind, detect_bombs};
pub use eval::{
    Diagnostic, Finding, RiskEval, analyze_findings, build_diagnostics, classify_risk_level,
    evaluate_risk,
};
pub use signals::{
    compute_complexity_delta, compute_contextual_value, compute_entropic_load,
    compute_path_dependence, containment_score, propagation_score,
};

/// Path prefixes treated as core code.
pub(crate) const CORE_PATHS: [&str; 6] = ["src/", "lib/", "core/", "pkg/", "internal/", "app/"];

/// Branch names treated as core merge targets.
pub(crate) const CORE_TARGETS: [&str; 5] = ["main", "master", "release", "production", "prod"];

/// Static risk bonus per declared level.
pub(crate) fn risk_bonus(level: crate::intent::RiskLevel) -> f64 {
    match level {
        crate::intent::RiskLevel::Low => 0.0,
        crate::intent::RiskLevel::Medium => 5.0,
        crate::intent::RiskLevel::High => 15.0,
        crate::intent::RiskLevel::Critical => 30.0,
    }
}

/// Clamps to `[0, 100]` and rounds to one decimal, the canonical signal
/// form.
pub(crate) fn clamp_signal(raw: f64) -> f64 {
    ((raw.min(100.0).max(0.0)) * 10.0).round() / 10.0
}
