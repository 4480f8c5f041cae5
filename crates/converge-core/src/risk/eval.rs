//! Full risk evaluation: signals, composites, findings, diagnostics.

use serde::{Deserialize, Serialize};

use super::bombs::{Bomb, detect_bombs};
use super::signals::{
    compute_complexity_delta, compute_contextual_value, compute_entropic_load,
    compute_path_dependence, containment_score, propagation_score,
};
use super::{CORE_TARGETS, clamp_signal};
use crate::graph::{CoChangePair, DependencyGraph, GraphMetrics, ImpactEdge, build_impact_edges};
use crate::intent::{Intent, RiskLevel};
use crate::scm::Simulation;

// Composite weights.
const RISK_W_ENTROPIC: f64 = 0.30;
const RISK_W_CONTEXTUAL: f64 = 0.25;
const RISK_W_COMPLEXITY: f64 = 0.20;
const RISK_W_PATH_DEP: f64 = 0.25;
const DMG_W_CONTEXTUAL: f64 = 0.50;
const DMG_W_ENTROPIC: f64 = 0.30;
const DMG_W_PATH_DEP: f64 = 0.20;

// Finding thresholds.
const FINDING_LARGE_CHANGE: usize = 15;
const FINDING_DEP_SPREAD: usize = 3;

// Diagnostic thresholds.
const DIAG_RISK_HIGH: f64 = 60.0;
const DIAG_RISK_CRITICAL: f64 = 80.0;
const DIAG_ENTROPY_MED: f64 = 20.0;
const DIAG_ENTROPY_HIGH: f64 = 40.0;
const DIAG_PROPAGATION: f64 = 40.0;
const DIAG_CONTAINMENT: f64 = 0.4;
const DIAG_ENTROPIC_LOAD: f64 = 50.0;
const DIAG_CONTEXTUAL_VALUE: f64 = 60.0;
const DIAG_PATH_DEP: f64 = 40.0;

/// A specific, code-addressable observation about the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Machine-readable code (`semantic.large_change`, ...).
    pub code: String,
    /// `critical`, `high`, or `medium`.
    pub severity: String,
    /// Human-readable message.
    pub message: String,
}

/// An explanatory diagnostic with a recommendation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// `critical`, `high`, `medium`, or `low`.
    pub severity: String,
    /// Machine-readable code (`diag.high_risk`, `diag.bomb.spiral`, ...).
    pub code: String,
    /// What was observed.
    pub explanation: String,
    /// What to do about it.
    pub recommendation: String,
}

/// The complete risk evaluation of one intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEval {
    /// The evaluated intent.
    pub intent_id: String,
    /// Composite risk score (0–100).
    pub risk_score: f64,
    /// Composite damage score (0–100).
    pub damage_score: f64,
    /// Entropy score (equal to the entropic-load signal).
    pub entropy_score: f64,
    /// Propagation score (0–100).
    pub propagation_score: f64,
    /// Containment score (0–1).
    pub containment_score: f64,
    /// Entropic-load signal.
    pub entropic_load: f64,
    /// Contextual-value signal.
    pub contextual_value: f64,
    /// Complexity-delta signal.
    pub complexity_delta: f64,
    /// Path-dependence signal.
    pub path_dependence: f64,
    /// Specific findings.
    pub findings: Vec<Finding>,
    /// Flat impact-edge list.
    pub impact_edges: Vec<ImpactEdge>,
    /// Graph metrics.
    pub graph_metrics: GraphMetrics,
    /// Detected bombs.
    pub bombs: Vec<Bomb>,
    /// Tenant partition key, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Classifies a composite risk score into a level:
/// `LOW [0,25) | MEDIUM [25,50) | HIGH [50,75) | CRITICAL [75,100]`.
#[must_use]
pub fn classify_risk_level(risk_score: f64) -> RiskLevel {
    if risk_score >= 75.0 {
        RiskLevel::Critical
    } else if risk_score >= 50.0 {
        RiskLevel::High
    } else if risk_score >= 25.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Generates specific findings from the intent and simulation.
#[must_use]
pub fn analyze_findings(intent: &Intent, simulation: &Simulation) -> Vec<Finding> {
    let mut findings = Vec::new();
    let files = simulation.files_changed.len();
    let deps = intent.dependencies.len();
    let conflicts = simulation.conflicts.len();

    if files > FINDING_LARGE_CHANGE {
        findings.push(Finding {
            code: "semantic.large_change".to_string(),
            severity: "high".to_string(),
            message: format!("Change touches {files} files"),
        });
    }
    if deps > FINDING_DEP_SPREAD {
        findings.push(Finding {
            code: "semantic.dependency_spread".to_string(),
            severity: "medium".to_string(),
            message: format!("Depends on {deps} other intents"),
        });
    }
    if CORE_TARGETS.contains(&intent.target.as_str()) {
        findings.push(Finding {
            code: "semantic.core_target".to_string(),
            severity: "high".to_string(),
            message: format!("Targets core branch: {}", intent.target),
        });
    }
    if conflicts > 0 {
        findings.push(Finding {
            code: "semantic.merge_conflict".to_string(),
            severity: "critical".to_string(),
            message: format!("{conflicts} merge conflict(s) detected"),
        });
    }
    findings
}

/// Full risk evaluation: builds the graph, computes the four signals,
/// composites, findings, impact edges, and bombs.
#[must_use]
pub fn evaluate_risk(
    intent: &Intent,
    simulation: &Simulation,
    coupling: &[CoChangePair],
) -> RiskEval {
    let graph = DependencyGraph::build(intent, simulation, coupling);
    let graph_metrics = graph.metrics();

    let entropic_load = compute_entropic_load(intent, simulation, &graph);
    let contextual_value = compute_contextual_value(intent, simulation, &graph);
    let complexity_delta = compute_complexity_delta(intent, simulation, &graph);
    let path_dependence = compute_path_dependence(intent, simulation, &graph);

    let findings = analyze_findings(intent, simulation);
    let impact_edges = build_impact_edges(intent, simulation);
    let propagation = propagation_score(&graph, &impact_edges);
    let containment = containment_score(intent, &graph, &impact_edges);
    let bombs = detect_bombs(intent, simulation, &graph);

    let risk_score = clamp_signal(
        entropic_load * RISK_W_ENTROPIC
            + contextual_value * RISK_W_CONTEXTUAL
            + complexity_delta * RISK_W_COMPLEXITY
            + path_dependence * RISK_W_PATH_DEP,
    );
    let damage_score = clamp_signal(
        contextual_value * DMG_W_CONTEXTUAL
            + entropic_load * DMG_W_ENTROPIC
            + path_dependence * DMG_W_PATH_DEP,
    );

    RiskEval {
        intent_id: intent.id.clone(),
        risk_score,
        damage_score,
        entropy_score: entropic_load,
        propagation_score: propagation,
        containment_score: containment,
        entropic_load,
        contextual_value,
        complexity_delta,
        path_dependence,
        findings,
        impact_edges,
        graph_metrics,
        bombs,
        tenant_id: intent.tenant_id.clone(),
    }
}

fn bomb_recommendation(kind: super::BombKind) -> &'static str {
    match kind {
        super::BombKind::Cascade => {
            "Split change to avoid touching high-centrality files simultaneously"
        }
        super::BombKind::Spiral => "Break circular dependencies before merging",
        super::BombKind::ThermalDeath => {
            "System is under stress, reduce change scope immediately"
        }
    }
}

fn severity_order(severity: &str) -> u8 {
    match severity {
        "critical" => 0,
        "high" => 1,
        "medium" => 2,
        _ => 3,
    }
}

/// Generates explanatory diagnostics from a risk evaluation, ordered
/// most severe first.
#[must_use]
pub fn build_diagnostics(risk_eval: &RiskEval, simulation: &Simulation) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    threshold_diag(
        &mut diags,
        risk_eval.risk_score > DIAG_RISK_HIGH,
        if risk_eval.risk_score > DIAG_RISK_CRITICAL {
            "critical"
        } else {
            "high"
        },
        "diag.high_risk",
        format!(
            "Combined risk score {:.0} exceeds safe threshold",
            risk_eval.risk_score
        ),
        "Split this change into smaller, independent intents",
    );
    threshold_diag(
        &mut diags,
        risk_eval.entropy_score > DIAG_ENTROPY_MED,
        if risk_eval.entropy_score > DIAG_ENTROPY_HIGH {
            "high"
        } else {
            "medium"
        },
        "diag.high_entropy",
        format!(
            "Entropy score {:.0} indicates high disorder",
            risk_eval.entropy_score
        ),
        "Reduce file count or dependencies before merging",
    );
    threshold_diag(
        &mut diags,
        risk_eval.propagation_score > DIAG_PROPAGATION,
        "high",
        "diag.high_propagation",
        format!(
            "Change propagation score {:.0} indicates wide blast radius",
            risk_eval.propagation_score
        ),
        "Review impact graph and consider narrowing scope",
    );
    threshold_diag(
        &mut diags,
        risk_eval.containment_score < DIAG_CONTAINMENT,
        "medium",
        "diag.low_containment",
        format!(
            "Containment {:.2} is below acceptable levels",
            risk_eval.containment_score
        ),
        "Add scope hints or reduce cross-boundary dependencies",
    );
    threshold_diag(
        &mut diags,
        risk_eval.entropic_load > DIAG_ENTROPIC_LOAD,
        "high",
        "diag.high_entropic_load",
        format!(
            "Entropic load {:.0} indicates high disorder introduction",
            risk_eval.entropic_load
        ),
        "Reduce the number of files, directories, or dependencies touched",
    );
    threshold_diag(
        &mut diags,
        risk_eval.contextual_value > DIAG_CONTEXTUAL_VALUE,
        "high",
        "diag.high_contextual_value",
        format!(
            "Change touches critical files (contextual value: {:.0})",
            risk_eval.contextual_value
        ),
        "Ensure thorough review of these high-centrality files",
    );
    threshold_diag(
        &mut diags,
        risk_eval.path_dependence > DIAG_PATH_DEP,
        "medium",
        "diag.path_dependent",
        format!(
            "Path dependence {:.0}: merge order matters",
            risk_eval.path_dependence
        ),
        "Coordinate merge timing with related intents",
    );

    if !simulation.mergeable {
        let shown: Vec<&str> = simulation
            .conflicts
            .iter()
            .take(5)
            .map(String::as_str)
            .collect();
        diags.push(Diagnostic {
            severity: "critical".to_string(),
            code: "diag.merge_conflict".to_string(),
            explanation: format!(
                "Merge has {} conflict(s): {}",
                simulation.conflicts.len(),
                shown.join(", ")
            ),
            recommendation: "Resolve conflicts in source branch before retrying".to_string(),
        });
    }

    for bomb in &risk_eval.bombs {
        diags.push(Diagnostic {
            severity: bomb.severity.clone(),
            code: format!("diag.bomb.{}", bomb.kind.as_str()),
            explanation: bomb.message.clone(),
            recommendation: bomb_recommendation(bomb.kind).to_string(),
        });
    }

    for finding in &risk_eval.findings {
        diags.push(Diagnostic {
            severity: finding.severity.clone(),
            code: finding.code.clone(),
            explanation: finding.message.clone(),
            recommendation: String::new(),
        });
    }

    diags.sort_by_key(|d| severity_order(&d.severity));
    diags
}

fn threshold_diag(
    out: &mut Vec<Diagnostic>,
    triggered: bool,
    severity: &str,
    code: &str,
    explanation: String,
    recommendation: &str,
) {
    if triggered {
        out.push(Diagnostic {
            severity: severity.to_string(),
            code: code.to_string(),
            explanation,
            recommendation: recommendation.to_string(),
        });
    }
}
