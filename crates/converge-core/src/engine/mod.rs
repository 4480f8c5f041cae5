//! The validation orchestrator.
//!
//! [`Engine::validate`] drives one intent through the full pipeline:
//! simulate → checks → risk → coherence → policy gates → risk gate →
//! finalize. Every event emitted by one invocation shares a single
//! trace id, and a short-circuit emits nothing past its terminating
//! block event.
//!
//! The orchestrator is stateless per invocation (all persistent state
//! lives behind the store), so any number of validations may run in
//! parallel on different intents.
//!
//! A blocked intent is a successful decision, not an error:
//! [`Outcome::Blocked`] carries the structured reason while
//! [`EngineError`] is reserved for infrastructure faults (SCM, store),
//! which surface as `validation.error` events and never touch the
//! retry counter.


use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use thiserror::Error;

use crate::check::{CheckResult, CheckRunner};
use crate::coherence::{
    CoherenceEvaluation, CoherenceVerdict, HarnessConfig, check_consistency, load_baselines,
};
use crate::event::{Event, EventType, new_trace_id};
use crate::flags::FlagRegistry;
use crate::graph::CoChangePair;
use crate::intent::{Intent, RiskLevel, Status};
use crate::log::EventLog;
use crate::policy::{
    GateEvidence, PolicyConfig, PolicyEvaluation, PolicyVerdict, RiskGateOutcome,
    evaluate as evaluate_gates, evaluate_risk_gate,
};
use crate::review;
use crate::risk::{RiskEval, build_diagnostics, classify_risk_level, evaluate_risk};
use crate::scanner::SecurityScanner;
use crate::scm::{Scm, ScmError, Simulation};
use crate::store::StoreError;

/// Conflicts shown in block messages.
const CONFLICT_DISPLAY_LIMIT: usize = 5;

/// Why an intent was blocked.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// The merge simulation found conflicts.
    MergeConflicts(Vec<String>),
    /// The coherence harness failed outright.
    CoherenceFail,
    /// A policy gate failed (the first failing one is named).
    Gate(crate::policy::GateName),
    /// The risk gate enforced a breach.
    RiskGate(Vec<crate::policy::Breach>),
}

impl BlockReason {
    /// The stable reason label recorded in `intent.blocked` payloads.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::MergeConflicts(_) => "conflicts".to_string(),
            Self::CoherenceFail => "coherence_fail".to_string(),
            Self::Gate(gate) => format!("gate:{gate}"),
            Self::RiskGate(_) => "risk_gate".to_string(),
        }
    }

    /// Human-readable block message.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::MergeConflicts(conflicts) => {
                let shown: Vec<&str> = conflicts
                    .iter()
                    .take(CONFLICT_DISPLAY_LIMIT)
                    .map(String::as_str)
                    .collect();
                format!("Merge conflicts: {}", shown.join(", "))
            }
            Self::CoherenceFail => "Coherence harness failed".to_string(),
            Self::Gate(gate) => format!("Policy blocked: gate {gate}"),
            Self::RiskGate(breaches) => {
                let metrics: Vec<&str> =
                    breaches.iter().map(|b| b.metric.as_str()).collect();
                format!("Risk gate enforced: {}", metrics.join(", "))
            }
        }
    }
}

/// Full record of a validation that reached the end of the pipeline.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationReport {
    /// The validated intent.
    pub intent_id: String,
    /// Trace id of the run.
    pub trace_id: String,
    /// The simulation used.
    pub simulation: Simulation,
    /// Risk evaluation.
    pub risk: RiskEval,
    /// Coherence evaluation (post cross-validation).
    pub coherence: CoherenceEvaluation,
    /// The five-gate evaluation.
    pub policy: PolicyEvaluation,
    /// Risk gate record (shadow outcomes included).
    pub risk_gate: RiskGateOutcome,
    /// Reclassification `(old, new)` when auto-classify rewrote the
    /// level.
    pub reclassified: Option<(RiskLevel, RiskLevel)>,
    /// Executed check results.
    pub checks: Vec<CheckResult>,
}

/// Partial record of a blocked validation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BlockedReport {
    /// The blocked intent.
    pub intent_id: String,
    /// Trace id of the run.
    pub trace_id: String,
    /// Structured block reason.
    pub reason: BlockReason,
    /// The simulation, when one ran.
    pub simulation: Option<Simulation>,
    /// The risk evaluation, when the pipeline got that far.
    pub risk: Option<RiskEval>,
    /// The gate evaluation, when the pipeline got that far.
    pub policy: Option<PolicyEvaluation>,
}

/// The discriminated result of a validation: both variants are
/// successful decisions.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The intent passed everything and is now `VALIDATED`.
    Validated(Box<ValidationReport>),
    /// The intent was blocked with a structured reason.
    Blocked(Box<BlockedReport>),
}

impl Outcome {
    /// True for the blocked variant.
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}

/// Infrastructure faults that abort a validation run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// SCM fault (after the single transient retry).
    #[error(transparent)]
    Scm(#[from] ScmError),

    /// Store fault.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The intent is not in a validatable state.
    #[error("intent {id} is {status}, expected READY or VALIDATED")]
    InvalidState {
        /// Intent id.
        id: String,
        /// Current status.
        status: String,
    },
}

/// The validation orchestrator.
pub struct Engine {
    log: Arc<EventLog>,
    scm: Arc<dyn Scm>,
    checks: CheckRunner,
    config: PolicyConfig,
    harness: HarnessConfig,
    harness_workdir: Option<PathBuf>,
    scanners: Vec<Box<dyn SecurityScanner>>,
    scan_path: Option<PathBuf>,
    flags: FlagRegistry,
    coupling: Vec<CoChangePair>,
}

impl Engine {
    /// Creates an engine over a log, an SCM adapter, and a policy
    /// configuration, with no checks, harness, or scanners wired yet.
    #[must_use]
    pub fn new(log: Arc<EventLog>, scm: Arc<dyn Scm>, config: PolicyConfig) -> Self {
        Self {
            log,
            scm,
            checks: CheckRunner::empty(),
            config,
            harness: HarnessConfig {
                version: "none".to_string(),
                questions: Vec::new(),
            },
            harness_workdir: None,
            scanners: Vec::new(),
            scan_path: None,
            flags: crate::flags::registry(),
            coupling: Vec::new(),
        }
    }

    /// Wires the check runner.
    #[must_use]
    pub fn with_checks(mut self, checks: CheckRunner) -> Self {
        self.checks = checks;
        self
    }

    /// Wires the coherence harness and its probe working directory.
    #[must_use]
    pub fn with_harness(mut self, harness: HarnessConfig, workdir: Option<PathBuf>) -> Self {
        self.harness = harness;
        self.harness_workdir = workdir;
        self
    }

    /// Wires security scanners and the path they scan.
    #[must_use]
    pub fn with_scanners(
        mut self,
        scanners: Vec<Box<dyn SecurityScanner>>,
        scan_path: PathBuf,
    ) -> Self {
        self.scanners = scanners;
        self.scan_path = Some(scan_path);
        self
    }

    /// Pins a flag registry snapshot (tests, embedding callers).
    #[must_use]
    pub fn with_flags(mut self, flags: FlagRegistry) -> Self {
        self.flags = flags;
        self
    }

    /// Supplies historical co-change pairs for graph enrichment.
    #[must_use]
    pub fn with_coupling(mut self, coupling: Vec<CoChangePair>) -> Self {
        self.coupling = coupling;
        self
    }

    /// The event log this engine writes to.
    #[must_use]
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// The SCM adapter this engine simulates against.
    #[must_use]
    pub fn scm(&self) -> &Arc<dyn Scm> {
        &self.scm
    }

    /// The policy configuration in effect.
    #[must_use]
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Validates one intent through the full pipeline, mutating its
    /// status (and possibly risk level) in memory and in the store.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on infrastructure faults; those emit a
    /// `validation.error` event and leave the retry counter alone.
    pub fn validate(&self, intent: &mut Intent) -> Result<Outcome, EngineError> {
        if !matches!(intent.status, Status::Ready | Status::Validated) {
            return Err(EngineError::InvalidState {
                id: intent.id.clone(),
                status: intent.status.to_string(),
            });
        }

        let trace_id = new_trace_id();
        match self.run_pipeline(intent, &trace_id) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                // Infrastructure faults are recorded, never silently lost.
                let _ = self.log.append(
                    self.event(
                        intent,
                        &trace_id,
                        EventType::ValidationError,
                        json!({"error": err.to_string()}),
                    ),
                );
                Err(err)
            }
        }
    }

    fn run_pipeline(&self, intent: &mut Intent, trace_id: &str) -> Result<Outcome, EngineError> {
        // Step 1: simulation.
        let simulation = self.simulate_step(intent, trace_id)?;
        if !simulation.mergeable {
            let reason = BlockReason::MergeConflicts(simulation.conflicts.clone());
            self.emit_blocked(intent, trace_id, &reason)?;
            return Ok(Outcome::Blocked(Box::new(BlockedReport {
                intent_id: intent.id.clone(),
                trace_id: trace_id.to_string(),
                reason,
                simulation: Some(simulation),
                risk: None,
                policy: None,
            })));
        }

        // Step 2: verification checks against the declared level's
        // profile. Failures do not short-circuit; gate 1 decides.
        let check_results = self.checks_step(intent, trace_id)?;
        let checks_passed: std::collections::BTreeSet<String> = check_results
            .iter()
            .filter(|r| r.passed)
            .map(|r| r.name.clone())
            .collect();

        // Step 2b: security scanners, results persisted for gate 4.
        self.scan_step(intent, trace_id)?;

        // Step 3: risk evaluation and optional reclassification.
        let risk = self.risk_step(intent, &simulation, trace_id)?;
        let reclassified = self.reclassify_step(intent, &risk, trace_id)?;

        // Step 4: coherence harness with cross-validation downgrades.
        let profile = self.config.profile_for(intent.risk_level, intent.origin_type);
        let coherence = self.coherence_step(intent, &risk, &profile, trace_id)?;
        if coherence.verdict == CoherenceVerdict::Fail {
            let reason = BlockReason::CoherenceFail;
            self.emit_blocked(intent, trace_id, &reason)?;
            return Ok(Outcome::Blocked(Box::new(BlockedReport {
                intent_id: intent.id.clone(),
                trace_id: trace_id.to_string(),
                reason,
                simulation: Some(simulation),
                risk: Some(risk),
                policy: None,
            })));
        }

        // Step 5: the five policy gates.
        let findings = self
            .log
            .store()
            .count_findings(Some(&intent.id), intent.tenant_id.as_deref())?;
        let evidence = GateEvidence {
            checks_passed,
            checks_required_extra: intent.checks_required.iter().cloned().collect(),
            containment_score: risk.containment_score,
            entropy_score: risk.entropy_score,
            security_critical: findings
                .get(&crate::scanner::FindingSeverity::Critical)
                .copied()
                .unwrap_or(0),
            security_high: findings
                .get(&crate::scanner::FindingSeverity::High)
                .copied()
                .unwrap_or(0),
            coherence_score: coherence.score,
        };
        let policy = evaluate_gates(&profile, intent.risk_level.as_str(), &evidence);
        self.log.append(
            self.event(
                intent,
                trace_id,
                EventType::PolicyEvaluated,
                json!({
                    "verdict": policy.verdict.as_str(),
                    "gates": policy.gates,
                    "profile_used": policy.profile_used,
                }),
            )
            .with_evidence(json!({"verdict": policy.verdict.as_str()})),
        )?;
        if policy.verdict == PolicyVerdict::Block {
            let gate = policy
                .first_failure()
                .map_or(crate::policy::GateName::Verification, |g| g.gate);
            let reason = BlockReason::Gate(gate);
            self.emit_blocked(intent, trace_id, &reason)?;
            return Ok(Outcome::Blocked(Box::new(BlockedReport {
                intent_id: intent.id.clone(),
                trace_id: trace_id.to_string(),
                reason,
                simulation: Some(simulation),
                risk: Some(risk),
                policy: Some(policy),
            })));
        }

        // Step 6: the risk gate.
        let risk_gate = evaluate_risk_gate(&self.config.risk, &risk, &intent.id);
        if risk_gate.enforced {
            let reason = BlockReason::RiskGate(risk_gate.breaches.clone());
            self.emit_blocked(intent, trace_id, &reason)?;
            return Ok(Outcome::Blocked(Box::new(BlockedReport {
                intent_id: intent.id.clone(),
                trace_id: trace_id.to_string(),
                reason,
                simulation: Some(simulation),
                risk: Some(risk),
                policy: Some(policy),
            })));
        }

        // Step 7: finalize.
        if intent.status != Status::Validated {
            // The walk was checked on entry; this cannot fail.
            let _ = intent.transition(Status::Validated);
        }
        self.log.append(
            self.event(
                intent,
                trace_id,
                EventType::IntentValidated,
                json!({
                    "source": intent.source,
                    "target": intent.target,
                    "risk_gate": risk_gate,
                }),
            )
            .with_evidence(json!({
                "risk_score": risk.risk_score,
                "policy_verdict": "ALLOW",
            })),
        )?;

        Ok(Outcome::Validated(Box::new(ValidationReport {
            intent_id: intent.id.clone(),
            trace_id: trace_id.to_string(),
            simulation,
            risk,
            coherence,
            policy,
            risk_gate,
            reclassified,
            checks: check_results,
        })))
    }

    fn simulate_step(
        &self,
        intent: &Intent,
        trace_id: &str,
    ) -> Result<Simulation, EngineError> {
        let simulation = match self.scm.simulate(&intent.source, &intent.target) {
            Ok(simulation) => simulation,
            Err(err) if err.is_transient() => {
                tracing::warn!(error = %err, "transient simulation failure, retrying once");
                self.scm.simulate(&intent.source, &intent.target)?
            }
            Err(err) => return Err(err.into()),
        };

        self.log.append(
            self.event(
                intent,
                trace_id,
                EventType::SimulationCompleted,
                json!({
                    "mergeable": simulation.mergeable,
                    "conflicts": simulation.conflicts,
                    "files_changed": simulation.files_changed,
                    "source": intent.source,
                    "target": intent.target,
                    "base_commit": simulation.base_commit,
                    "head_commit": simulation.head_commit,
                }),
            )
            .with_evidence(json!({
                "conflict_count": simulation.conflicts.len(),
                "mergeable": simulation.mergeable,
            })),
        )?;
        Ok(simulation)
    }

    fn checks_step(
        &self,
        intent: &Intent,
        trace_id: &str,
    ) -> Result<Vec<CheckResult>, EngineError> {
        let profile = self.config.profile_for(intent.risk_level, intent.origin_type);
        let mut required: Vec<String> = profile.checks.clone();
        for extra in &intent.checks_required {
            if !required.contains(extra) {
                required.push(extra.clone());
            }
        }

        let results = self.checks.run_all(&required);
        for result in &results {
            self.log.append(
                self.event(
                    intent,
                    trace_id,
                    EventType::CheckCompleted,
                    json!({
                        "check": result.name,
                        "passed": result.passed,
                        "details": result.details,
                        "duration_ms": result.duration_ms,
                    }),
                )
                .with_evidence(json!({"check": result.name, "passed": result.passed})),
            )?;
        }
        Ok(results)
    }

    fn scan_step(&self, intent: &Intent, trace_id: &str) -> Result<(), EngineError> {
        let Some(scan_path) = &self.scan_path else {
            return Ok(());
        };
        if self.scanners.is_empty() || !self.flags.is_enabled("security_adapters") {
            return Ok(());
        }
        crate::scanner::run_scan(
            &self.log,
            &self.scanners,
            scan_path,
            Some(&intent.id),
            intent.tenant_id.as_deref(),
            trace_id,
        )?;
        Ok(())
    }

    fn risk_step(
        &self,
        intent: &Intent,
        simulation: &Simulation,
        trace_id: &str,
    ) -> Result<RiskEval, EngineError> {
        let risk = evaluate_risk(intent, simulation, &self.coupling);
        let diagnostics = build_diagnostics(&risk, simulation);
        let bomb_kinds: Vec<&str> = risk.bombs.iter().map(|b| b.kind.as_str()).collect();

        self.log.append(
            self.event(
                intent,
                trace_id,
                EventType::RiskEvaluated,
                json!({"risk": risk, "diagnostics": diagnostics}),
            )
            .with_evidence(json!({
                "risk_score": risk.risk_score,
                "damage_score": risk.damage_score,
                "signals": {
                    "entropic_load": risk.entropic_load,
                    "contextual_value": risk.contextual_value,
                    "complexity_delta": risk.complexity_delta,
                    "path_dependence": risk.path_dependence,
                },
                "bombs": bomb_kinds,
            })),
        )?;
        Ok(risk)
    }

    fn reclassify_step(
        &self,
        intent: &mut Intent,
        risk: &RiskEval,
        trace_id: &str,
    ) -> Result<Option<(RiskLevel, RiskLevel)>, EngineError> {
        if !self.flags.is_enforced("auto_classify") {
            return Ok(None);
        }
        let computed = classify_risk_level(risk.risk_score);
        if computed == intent.risk_level {
            return Ok(None);
        }
        let old = intent.risk_level;
        intent.risk_level = computed;
        intent.updated_at = crate::event::now_utc();
        self.log.store().upsert_intent(intent)?;
        self.log.append(
            self.event(
                intent,
                trace_id,
                EventType::RiskLevelReclassified,
                json!({
                    "old": old,
                    "new": computed,
                    "risk_score": risk.risk_score,
                }),
            )
            .with_evidence(json!({"old": old, "new": computed})),
        )?;
        tracing::info!(
            intent_id = %intent.id,
            old = %old,
            new = %computed,
            "risk level reclassified"
        );
        Ok(Some((old, computed)))
    }

    fn coherence_step(
        &self,
        intent: &Intent,
        risk: &RiskEval,
        profile: &crate::policy::Profile,
        trace_id: &str,
    ) -> Result<CoherenceEvaluation, EngineError> {
        let questions = self.harness.enabled_questions();
        let baselines = load_baselines(&self.log)?;
        let mut evaluation = crate::coherence::evaluate(
            &questions,
            self.harness_workdir.as_deref(),
            &baselines,
            profile.coherence_pass,
            profile.coherence_warn,
            &self.harness.version,
        );

        // Downgrades apply before the evaluation is recorded; the
        // inconsistency note follows the evaluation it refers to.
        let inconsistencies = check_consistency(&evaluation, risk);
        if !inconsistencies.is_empty() {
            evaluation.verdict = evaluation.verdict.downgraded();
        }

        self.log.append(
            self.event(
                intent,
                trace_id,
                EventType::CoherenceEvaluated,
                json!({
                    "score": evaluation.score,
                    "verdict": evaluation.verdict.as_str(),
                    "results": evaluation.results,
                    "harness_version": evaluation.harness_version,
                }),
            )
            .with_evidence(json!({
                "score": evaluation.score,
                "verdict": evaluation.verdict.as_str(),
            })),
        )?;

        if !inconsistencies.is_empty() {
            self.log.append(
                self.event(
                    intent,
                    trace_id,
                    EventType::CoherenceInconsistency,
                    json!({
                        "inconsistencies": inconsistencies,
                        "downgraded_to": evaluation.verdict.as_str(),
                    }),
                ),
            )?;
            if self.flags.is_enabled("review_tasks") {
                if let Err(err) =
                    review::request_review(&self.log, &intent.id, "coherence_inconsistency", None)
                {
                    tracing::warn!(error = %err, "review request failed");
                }
            }
        }
        Ok(evaluation)
    }

    fn emit_blocked(
        &self,
        intent: &Intent,
        trace_id: &str,
        reason: &BlockReason,
    ) -> Result<(), StoreError> {
        self.log.append(
            self.event(
                intent,
                trace_id,
                EventType::IntentBlocked,
                json!({
                    "reason": reason.label(),
                    "message": reason.message(),
                }),
            )
            .with_evidence(json!({"reason": reason.label()})),
        )?;
        Ok(())
    }

    fn event(
        &self,
        intent: &Intent,
        trace_id: &str,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Event {
        Event::new(event_type, payload)
            .with_trace(trace_id)
            .with_intent(intent.id.clone())
            .with_tenant(intent.tenant_id.clone())
    }
}

/// Confirms a `QUEUED` (or `VALIDATED`) intent as merged, recording the
/// commit.
///
/// # Errors
///
/// Returns [`EngineError::InvalidState`] outside those states and
/// propagates store faults.
pub fn confirm_merge(
    log: &EventLog,
    intent_id: &str,
    merged_commit: Option<&str>,
) -> Result<Intent, EngineError> {
    let Some(mut intent) = log.store().get_intent(intent_id)? else {
        return Err(EngineError::InvalidState {
            id: intent_id.to_string(),
            status: "missing".to_string(),
        });
    };
    if !matches!(intent.status, Status::Queued | Status::Validated) {
        return Err(EngineError::InvalidState {
            id: intent_id.to_string(),
            status: intent.status.to_string(),
        });
    }

    let sha = merged_commit.map_or_else(
        || format!("confirmed-{}", &intent_id[..intent_id.len().min(8)]),
        str::to_string,
    );
    log.append(
        Event::new(
            EventType::IntentMerged,
            json!({
                "merged_commit": sha,
                "source": intent.source,
                "target": intent.target,
            }),
        )
        .with_intent(intent_id)
        .with_tenant(intent.tenant_id.clone())
        .with_evidence(json!({"merged_commit": sha})),
    )?;
    let _ = intent.transition(Status::Merged);
    Ok(intent)
}
