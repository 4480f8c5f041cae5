//! The risk gate: composite-score enforcement with canary rollout.
//!
//! Outside the five gates, the risk gate compares `risk_score`,
//! `damage_score`, and `propagation_score` against configured maxima.
//! In `shadow` mode a breach is only recorded (`would_block`); in
//! `enforce` mode it blocks the intent iff its deterministic rollout
//! bucket falls below `enforce_ratio`, so enforcement can be ramped up
//! gradually while staying stable per intent across retries.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::risk::RiskEval;

/// Risk gate mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskGateMode {
    /// Record breaches without blocking.
    #[default]
    Shadow,
    /// Block breaching intents inside the rollout group.
    Enforce,
}

impl RiskGateMode {
    /// Returns the lowercase string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shadow => "shadow",
            Self::Enforce => "enforce",
        }
    }
}

/// Risk gate configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskGateConfig {
    /// Maximum composite risk score.
    #[serde(default = "default_max_risk")]
    pub max_risk_score: f64,
    /// Maximum composite damage score.
    #[serde(default = "default_max_damage")]
    pub max_damage_score: f64,
    /// Maximum propagation score.
    #[serde(default = "default_max_propagation")]
    pub max_propagation_score: f64,
    /// Shadow or enforce.
    #[serde(default)]
    pub mode: RiskGateMode,
    /// Fraction of intents enforcement applies to, in `[0, 1]`.
    #[serde(default = "default_enforce_ratio")]
    pub enforce_ratio: f64,
}

const fn default_max_risk() -> f64 {
    65.0
}

const fn default_max_damage() -> f64 {
    60.0
}

const fn default_max_propagation() -> f64 {
    55.0
}

const fn default_enforce_ratio() -> f64 {
    1.0
}

impl Default for RiskGateConfig {
    fn default() -> Self {
        Self {
            max_risk_score: default_max_risk(),
            max_damage_score: default_max_damage(),
            max_propagation_score: default_max_propagation(),
            mode: RiskGateMode::default(),
            enforce_ratio: default_enforce_ratio(),
        }
    }
}

/// One breached metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breach {
    /// Metric name.
    pub metric: String,
    /// Observed value.
    pub value: f64,
    /// Configured limit.
    pub limit: f64,
}

/// The risk gate's decision record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskGateOutcome {
    /// True when any metric breached its limit.
    pub would_block: bool,
    /// True when the breach is actually enforced.
    pub enforced: bool,
    /// Mode at evaluation time.
    pub mode: RiskGateMode,
    /// Ratio at evaluation time.
    pub enforce_ratio: f64,
    /// The intent's deterministic bucket in `[0, 1)`.
    pub rollout_bucket: f64,
    /// Whether the bucket falls inside the enforcement group.
    pub in_enforcement_group: bool,
    /// Breached metrics.
    pub breaches: Vec<Breach>,
}

/// The deterministic rollout bucket of an intent id:
/// `u32(SHA256(id)[0..4]) / 2^32 ∈ [0, 1)`.
#[must_use]
pub fn rollout_bucket(intent_id: &str) -> f64 {
    let digest = Sha256::digest(intent_id.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    f64::from(head) / f64::from(u32::MAX)
}

/// Evaluates the risk gate against a risk evaluation.
#[must_use]
pub fn evaluate_risk_gate(
    config: &RiskGateConfig,
    risk_eval: &RiskEval,
    intent_id: &str,
) -> RiskGateOutcome {
    let mut breaches = Vec::new();
    for (metric, value, limit) in [
        ("risk_score", risk_eval.risk_score, config.max_risk_score),
        ("damage_score", risk_eval.damage_score, config.max_damage_score),
        (
            "propagation_score",
            risk_eval.propagation_score,
            config.max_propagation_score,
        ),
    ] {
        if value > limit {
            breaches.push(Breach {
                metric: metric.to_string(),
                value,
                limit,
            });
        }
    }

    let would_block = !breaches.is_empty();
    let bucket = rollout_bucket(intent_id);
    let in_group = bucket < config.enforce_ratio;
    let enforced = config.mode == RiskGateMode::Enforce && would_block && in_group;

    RiskGateOutcome {
        would_block,
        enforced,
        mode: config.mode,
        enforce_ratio: config.enforce_ratio,
        rollout_bucket: (bucket * 10_000.0).round() / 10_000.0,
        in_enforcement_group: in_group,
        breaches,
    }
}
