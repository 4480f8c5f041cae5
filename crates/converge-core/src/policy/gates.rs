//! The five policy gates.
//!
//! Gates are evaluated in a fixed order but always all computed, so a
//! BLOCK verdict still carries the full diagnostic picture. Evaluation
//! is a pure function of `(profile, evidence)`: no store access, no
//! clocks, no hidden state.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::Profile;

/// Gate identity, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateName {
    /// Required checks passed.
    Verification,
    /// Containment at or above the floor.
    Containment,
    /// Entropy within budget.
    Entropy,
    /// Security findings within maxima.
    Security,
    /// Coherence not failing.
    Coherence,
}

impl GateName {
    /// Returns the lowercase string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::Containment => "containment",
            Self::Entropy => "entropy",
            Self::Security => "security",
            Self::Coherence => "coherence",
        }
    }
}

impl std::fmt::Display for GateName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One gate's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    /// Which gate.
    pub gate: GateName,
    /// Whether it passed.
    pub passed: bool,
    /// Human-readable reason.
    pub reason: String,
    /// The measured value.
    pub value: f64,
    /// The threshold it was compared against.
    pub threshold: f64,
}

/// The overall verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyVerdict {
    /// Every gate passed.
    Allow,
    /// At least one gate failed.
    Block,
}

impl PolicyVerdict {
    /// Returns the uppercase string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::Block => "BLOCK",
        }
    }
}

/// The evidence the gates decide over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEvidence {
    /// Names of checks that passed.
    pub checks_passed: BTreeSet<String>,
    /// Extra checks required by the intent itself (unioned with the
    /// profile's set).
    #[serde(default)]
    pub checks_required_extra: BTreeSet<String>,
    /// Containment score in `[0, 1]`.
    pub containment_score: f64,
    /// Entropy score in `[0, 100]`.
    pub entropy_score: f64,
    /// Critical security findings.
    pub security_critical: u64,
    /// High security findings.
    pub security_high: u64,
    /// Coherence score in `[0, 100]`.
    pub coherence_score: f64,
}

/// Full evaluation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEvaluation {
    /// ALLOW iff every gate passed.
    pub verdict: PolicyVerdict,
    /// Per-gate results, in evaluation order.
    pub gates: Vec<GateResult>,
    /// Profile key the evaluation used.
    pub profile_used: String,
}

impl PolicyEvaluation {
    /// The first failing gate, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<&GateResult> {
        self.gates.iter().find(|g| !g.passed)
    }
}

/// Evaluates the five gates. Pure: equal inputs give equal outputs.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn evaluate(profile: &Profile, profile_key: &str, evidence: &GateEvidence) -> PolicyEvaluation {
    let mut gates = Vec::with_capacity(5);

    // Gate 1: verification. Effective set = profile ∪ intent extras.
    let mut required: BTreeSet<String> = profile.checks.iter().cloned().collect();
    required.extend(evidence.checks_required_extra.iter().cloned());
    let missing: Vec<&String> = required
        .iter()
        .filter(|name| !evidence.checks_passed.contains(*name))
        .collect();
    gates.push(GateResult {
        gate: GateName::Verification,
        passed: missing.is_empty(),
        reason: if missing.is_empty() {
            "All required checks passed".to_string()
        } else {
            format!(
                "Missing checks: [{}]",
                missing
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        },
        value: evidence.checks_passed.len() as f64,
        threshold: required.len() as f64,
    });

    // Gate 2: containment.
    gates.push(GateResult {
        gate: GateName::Containment,
        passed: evidence.containment_score >= profile.containment_min,
        reason: format!(
            "Containment {:.2} vs min {:.2}",
            evidence.containment_score, profile.containment_min
        ),
        value: evidence.containment_score,
        threshold: profile.containment_min,
    });

    // Gate 3: entropy.
    gates.push(GateResult {
        gate: GateName::Entropy,
        passed: evidence.entropy_score <= profile.entropy_budget,
        reason: format!(
            "Entropy {:.1} vs budget {:.1}",
            evidence.entropy_score, profile.entropy_budget
        ),
        value: evidence.entropy_score,
        threshold: profile.entropy_budget,
    });

    // Gate 4: security. The surfaced value packs both counts.
    let security_ok = evidence.security_critical <= profile.security.max_critical
        && evidence.security_high <= profile.security.max_high;
    gates.push(GateResult {
        gate: GateName::Security,
        passed: security_ok,
        reason: format!(
            "Findings critical={} (max {}), high={} (max {})",
            evidence.security_critical,
            profile.security.max_critical,
            evidence.security_high,
            profile.security.max_high
        ),
        value: (evidence.security_critical * 10 + evidence.security_high) as f64,
        threshold: (profile.security.max_critical * 10 + profile.security.max_high) as f64,
    });

    // Gate 5: coherence. Anything at or above the warn threshold
    // (not FAIL) passes.
    gates.push(GateResult {
        gate: GateName::Coherence,
        passed: evidence.coherence_score >= profile.coherence_warn,
        reason: format!(
            "Coherence {:.0} vs warn threshold {:.0}",
            evidence.coherence_score, profile.coherence_warn
        ),
        value: evidence.coherence_score,
        threshold: profile.coherence_warn,
    });

    let all_passed = gates.iter().all(|g| g.passed);
    PolicyEvaluation {
        verdict: if all_passed {
            PolicyVerdict::Allow
        } else {
            PolicyVerdict::Block
        },
        gates,
        profile_used: profile_key.to_string(),
    }
}
