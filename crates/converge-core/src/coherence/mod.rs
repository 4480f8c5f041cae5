//! Coherence harness: baseline-relative external probes.
//!
//! A harness is a configured list of questions, each backed by a shell
//! probe whose last stdout line parses as a number. The number is
//! checked against an assertion (typically relative to the stored
//! baseline) and failed questions subtract severity-weighted points
//! from a 0–100 score. The verdict compares the score against the
//! active profile's pass/warn thresholds.
//!
//! Baselines live in the event log: the latest
//! `coherence.baseline_updated` event wins, and only the explicit
//! administrative operation writes one.

mod assert;


use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

pub use assert::{AssertError, Assertion};

use crate::event::{Event, EventType};
use crate::exec;
use crate::log::EventLog;
use crate::risk::RiskEval;
use crate::store::StoreError;

/// Hard per-probe timeout.
pub const QUESTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Probe output capture cap.
const QUESTION_OUTPUT_LIMIT: usize = 4096;

/// Default harness config location.
pub const HARNESS_CONFIG_PATH: &str = ".converge/coherence_harness.json";

/// Severity weight subtracted per failed question.
#[must_use]
pub fn severity_weight(severity: QuestionSeverity) -> f64 {
    match severity {
        QuestionSeverity::Critical => 30.0,
        QuestionSeverity::High => 20.0,
        QuestionSeverity::Medium => 10.0,
    }
}

/// Question severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionSeverity {
    /// Failing this question costs 30 points.
    Critical,
    /// Failing this question costs 20 points.
    High,
    /// Failing this question costs 10 points.
    Medium,
}

/// One configured coherence question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Stable question id (`q-` prefixed by convention).
    pub id: String,
    /// The human question being asked.
    pub question: String,
    /// Shell command whose last stdout line is the measurement.
    pub check: String,
    /// Assertion over `result` and `baseline`.
    pub assertion: String,
    /// Severity weight class.
    #[serde(default = "default_severity")]
    pub severity: QuestionSeverity,
    /// Free-form category tag.
    #[serde(default = "default_category")]
    pub category: String,
    /// Disabled questions are skipped.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_severity() -> QuestionSeverity {
    QuestionSeverity::High
}

fn default_category() -> String {
    "structural".to_string()
}

const fn default_enabled() -> bool {
    true
}

/// The harness configuration file shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Config schema version.
    #[serde(default)]
    pub version: String,
    /// All configured questions (including disabled ones).
    pub questions: Vec<Question>,
}

impl HarnessConfig {
    /// Loads the harness config from `path`, or the default location.
    /// A missing file yields an empty harness.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] on unreadable or malformed config.
    pub fn load(path: Option<&Path>) -> Result<Self, HarnessError> {
        let path = path.unwrap_or_else(|| Path::new(HARNESS_CONFIG_PATH));
        if !path.exists() {
            return Ok(Self {
                version: "none".to_string(),
                questions: Vec::new(),
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|err| HarnessError::Unreadable {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        let config: Self =
            serde_json::from_str(&raw).map_err(|err| HarnessError::Malformed {
                path: path.display().to_string(),
                reason: err.to_string(),
            })?;
        // Assertions must parse up front; a bad harness is a config
        // error, not a runtime surprise.
        for question in &config.questions {
            Assertion::parse(&question.assertion).map_err(|err| HarnessError::BadAssertion {
                question: question.id.clone(),
                source: err,
            })?;
        }
        Ok(config)
    }

    /// The enabled questions, in config order.
    #[must_use]
    pub fn enabled_questions(&self) -> Vec<Question> {
        self.questions.iter().filter(|q| q.enabled).cloned().collect()
    }
}

/// Harness configuration errors. Fatal at load time.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HarnessError {
    /// The config file exists but cannot be read.
    #[error("cannot read harness config {path}: {reason}")]
    Unreadable {
        /// Config path.
        path: String,
        /// Failure detail.
        reason: String,
    },

    /// The config file is not valid JSON for the schema.
    #[error("malformed harness config {path}: {reason}")]
    Malformed {
        /// Config path.
        path: String,
        /// Parse failure detail.
        reason: String,
    },

    /// A question's assertion does not parse.
    #[error("bad assertion in question {question}: {source}")]
    BadAssertion {
        /// Question id.
        question: String,
        /// The grammar violation.
        source: AssertError,
    },
}

/// Outcome of one question run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    /// Question id.
    pub question_id: String,
    /// The human question.
    pub question: String,
    /// True when the assertion held.
    pub passed: bool,
    /// Parsed numeric measurement (0 on error).
    pub value: f64,
    /// The baseline in effect, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<f64>,
    /// The assertion text.
    pub assertion: String,
    /// Probe failure detail, when the command failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Verdict of a harness run relative to the profile thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CoherenceVerdict {
    /// Score at or above the pass threshold.
    Pass,
    /// Score at or above the warn threshold.
    Warn,
    /// Score below the warn threshold.
    Fail,
}

impl CoherenceVerdict {
    /// One-step downgrade: `PASS→WARN`, `WARN→FAIL`, `FAIL→FAIL`.
    #[must_use]
    pub const fn downgraded(self) -> Self {
        match self {
            Self::Pass => Self::Warn,
            Self::Warn | Self::Fail => Self::Fail,
        }
    }

    /// Returns the uppercase string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Warn => "WARN",
            Self::Fail => "FAIL",
        }
    }
}

/// Aggregate result of a harness run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoherenceEvaluation {
    /// Severity-weighted score in `[0, 100]`.
    pub score: f64,
    /// Verdict against the profile thresholds.
    pub verdict: CoherenceVerdict,
    /// Per-question results.
    pub results: Vec<QuestionResult>,
    /// Harness config version.
    pub harness_version: String,
}

/// An observed disagreement between the harness and risk metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inconsistency {
    /// `score_mismatch`, `bomb_undetected`, or
    /// `missing_scope_validation`.
    pub kind: String,
    /// Human-readable detail.
    pub message: String,
}

/// Loads the current baselines: the payload of the latest
/// `coherence.baseline_updated` event.
///
/// # Errors
///
/// Returns [`StoreError`] on backend faults.
pub fn load_baselines(log: &EventLog) -> Result<BTreeMap<String, f64>, StoreError> {
    let Some(event) = log.latest_of(EventType::CoherenceBaselineUpdated, None)? else {
        return Ok(BTreeMap::new());
    };
    let mut baselines = BTreeMap::new();
    if let Some(map) = event.payload.get("baselines").and_then(Value::as_object) {
        for (id, value) in map {
            if let Some(number) = value.as_f64() {
                baselines.insert(id.clone(), number);
            }
        }
    }
    Ok(baselines)
}

/// Stores the numeric results of a harness run as the new baselines
/// (administrative operation).
///
/// # Errors
///
/// Returns [`StoreError`] on backend faults.
pub fn update_baselines(
    log: &EventLog,
    results: &[QuestionResult],
) -> Result<BTreeMap<String, f64>, StoreError> {
    let baselines: BTreeMap<String, f64> = results
        .iter()
        .filter(|r| r.error.is_none())
        .map(|r| (r.question_id.clone(), r.value))
        .collect();
    log.append(Event::new(
        EventType::CoherenceBaselineUpdated,
        json!({"baselines": baselines}),
    ))?;
    Ok(baselines)
}

/// Runs one question: executes the probe, parses the last stdout line,
/// and evaluates the assertion.
#[must_use]
pub fn run_question(
    question: &Question,
    workdir: Option<&Path>,
    baselines: &BTreeMap<String, f64>,
) -> QuestionResult {
    let baseline = baselines.get(&question.id).copied();
    let failed = |error: String| QuestionResult {
        question_id: question.id.clone(),
        question: question.question.clone(),
        passed: false,
        value: 0.0,
        baseline,
        assertion: question.assertion.clone(),
        error: Some(error),
    };

    let output = match exec::run_shell(
        &question.check,
        workdir,
        QUESTION_TIMEOUT,
        QUESTION_OUTPUT_LIMIT,
    ) {
        Ok(output) => output,
        Err(err) => return failed(err.to_string()),
    };
    if output.timed_out {
        return failed("probe timed out".to_string());
    }
    if output.status_code != Some(0) {
        return failed(format!(
            "probe failed (rc={}): {}",
            output.status_code.map_or("?".to_string(), |c| c.to_string()),
            output.stderr.chars().take(200).collect::<String>()
        ));
    }

    let Some(value) = parse_last_line(&output.stdout) else {
        return failed(format!(
            "probe output is not numeric: {:?}",
            output.stdout.lines().last().unwrap_or_default()
        ));
    };

    // Assertions are validated at config load; an unparseable one here
    // counts as a failed question rather than a crash.
    let passed = Assertion::parse(&question.assertion)
        .map(|a| a.evaluate(value, baseline))
        .unwrap_or(false);

    QuestionResult {
        question_id: question.id.clone(),
        question: question.question.clone(),
        passed,
        value,
        baseline,
        assertion: question.assertion.clone(),
        error: None,
    }
}

/// Runs every question and computes the severity-weighted score and
/// verdict.
#[must_use]
pub fn evaluate(
    questions: &[Question],
    workdir: Option<&Path>,
    baselines: &BTreeMap<String, f64>,
    pass_threshold: f64,
    warn_threshold: f64,
    harness_version: &str,
) -> CoherenceEvaluation {
    if questions.is_empty() {
        return CoherenceEvaluation {
            score: 100.0,
            verdict: CoherenceVerdict::Pass,
            results: Vec::new(),
            harness_version: harness_version.to_string(),
        };
    }

    let results: Vec<QuestionResult> = questions
        .iter()
        .map(|q| run_question(q, workdir, baselines))
        .collect();

    let penalty: f64 = questions
        .iter()
        .zip(&results)
        .filter(|(_, r)| !r.passed)
        .map(|(q, _)| severity_weight(q.severity))
        .sum();
    let score = (100.0 - penalty).clamp(0.0, 100.0);

    let verdict = if score >= pass_threshold {
        CoherenceVerdict::Pass
    } else if score >= warn_threshold {
        CoherenceVerdict::Warn
    } else {
        CoherenceVerdict::Fail
    };

    CoherenceEvaluation {
        score,
        verdict,
        results,
        harness_version: harness_version.to_string(),
    }
}

/// Cross-validates the harness outcome against the objective risk
/// metrics. Any inconsistency downgrades the verdict one step.
#[must_use]
pub fn check_consistency(
    evaluation: &CoherenceEvaluation,
    risk_eval: &RiskEval,
) -> Vec<Inconsistency> {
    let mut inconsistencies = Vec::new();

    if evaluation.score > 75.0 && risk_eval.risk_score > 50.0 {
        inconsistencies.push(Inconsistency {
            kind: "score_mismatch".to_string(),
            message: format!(
                "Coherence harness passed ({:.0}) but risk is elevated ({:.0})",
                evaluation.score, risk_eval.risk_score
            ),
        });
    }

    if !evaluation.results.is_empty()
        && evaluation.results.iter().all(|r| r.passed)
        && !risk_eval.bombs.is_empty()
    {
        let kinds: Vec<&str> = risk_eval.bombs.iter().map(|b| b.kind.as_str()).collect();
        inconsistencies.push(Inconsistency {
            kind: "bomb_undetected".to_string(),
            message: format!(
                "Structural degradation detected ({}) but the harness did not flag it",
                kinds.join(", ")
            ),
        });
    }

    let has_scope_question = evaluation
        .results
        .iter()
        .any(|r| r.question_id.starts_with("q-scope"));
    if risk_eval.propagation_score > 40.0 && !has_scope_question {
        inconsistencies.push(Inconsistency {
            kind: "missing_scope_validation".to_string(),
            message: format!(
                "High propagation ({:.0}) but no scope questions in the harness",
                risk_eval.propagation_score
            ),
        });
    }

    inconsistencies
}

/// Parses the last non-empty stdout line as a float.
fn parse_last_line(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())?
        .parse()
        .ok()
}
