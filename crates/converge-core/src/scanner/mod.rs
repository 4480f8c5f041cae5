//! Security scanner port and the normalized finding model.
//!
//! Scanners are pluggable adapters (SAST, SCA, secrets) that run against a
//! checkout path and return findings normalized to [`SecurityFinding`]. A
//! missing scanner is skipped and recorded, never an error. Secrets
//! findings are always `HIGH` and their evidence is truncated to the rule
//! name plus the first 8 bytes of the match, so raw secrets never reach
//! the event log.

mod command;

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

pub use command::CommandScanner;

use crate::event::{Event, EventType, new_id, now_utc};
use crate::log::EventLog;
use crate::store::StoreError;

/// Finding severity, highest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    /// Exploitable or policy-fatal.
    Critical,
    /// Serious; bounded per profile.
    High,
    /// Noteworthy.
    Medium,
    /// Minor.
    Low,
    /// Informational only.
    Info,
}

impl FindingSeverity {
    /// Returns the lowercase string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }

    /// Parses from the lowercase string form; unknown strings map to
    /// `Info` so a misbehaving scanner can never inflate severity.
    #[must_use]
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "critical" => Self::Critical,
            "high" | "error" => Self::High,
            "medium" | "warning" => Self::Medium,
            "low" => Self::Low,
            _ => Self::Info,
        }
    }
}

/// Scanner category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingCategory {
    /// Static application security testing.
    Sast,
    /// Software composition analysis (dependency advisories).
    Sca,
    /// Leaked credentials.
    Secrets,
}

impl FindingCategory {
    /// Returns the lowercase string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sast => "sast",
            Self::Sca => "sca",
            Self::Secrets => "secrets",
        }
    }

    /// Parses from the lowercase string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sast" => Some(Self::Sast),
            "sca" => Some(Self::Sca),
            "secrets" => Some(Self::Secrets),
            _ => None,
        }
    }
}

/// Maximum bytes of a secret match carried in evidence.
const SECRET_EVIDENCE_BYTES: usize = 8;

/// A normalized security finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityFinding {
    /// Unique finding id.
    pub id: String,
    /// Scanner that produced the finding.
    pub scanner: String,
    /// Scanner category.
    pub category: FindingCategory,
    /// Normalized severity.
    pub severity: FindingSeverity,
    /// File the finding points at.
    #[serde(default)]
    pub file: String,
    /// Line number (0 if unknown).
    #[serde(default)]
    pub line: u32,
    /// Rule or advisory identifier.
    #[serde(default)]
    pub rule: String,
    /// Evidence excerpt (truncated for secrets).
    #[serde(default)]
    pub evidence: String,
    /// Scanner confidence (high/medium/low).
    #[serde(default = "default_confidence")]
    pub confidence: String,
    /// Scan batch this finding belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<String>,
    /// Intent under scan, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<String>,
    /// Tenant partition key, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// When the finding was produced.
    pub timestamp: DateTime<Utc>,
}

fn default_confidence() -> String {
    "medium".to_string()
}

impl SecurityFinding {
    /// Creates a finding with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(
        scanner: impl Into<String>,
        category: FindingCategory,
        severity: FindingSeverity,
    ) -> Self {
        Self {
            id: new_id(),
            scanner: scanner.into(),
            category,
            severity,
            file: String::new(),
            line: 0,
            rule: String::new(),
            evidence: String::new(),
            confidence: default_confidence(),
            scan_id: None,
            intent_id: None,
            tenant_id: None,
            timestamp: now_utc(),
        }
    }

    /// Applies category-specific normalization: secrets findings are
    /// forced to `HIGH` and the evidence is reduced to the rule name plus
    /// the first 8 bytes of the matched text.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.category == FindingCategory::Secrets {
            self.severity = FindingSeverity::High;
            let head: String = self.evidence.chars().take(SECRET_EVIDENCE_BYTES).collect();
            self.evidence = if head.is_empty() {
                self.rule.clone()
            } else {
                format!("{}: {head}…", self.rule)
            };
        }
        self
    }
}

/// Errors raised by scanner adapters.
///
/// A missing tool is not an error (callers probe [`SecurityScanner::is_available`]
/// first); these cover malformed output and execution faults.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScannerError {
    /// The scanner subprocess could not be spawned or waited on.
    #[error("scanner {scanner} failed to execute: {reason}")]
    Execution {
        /// Scanner name.
        scanner: String,
        /// Failure detail.
        reason: String,
    },

    /// The scanner produced output that does not parse.
    #[error("scanner {scanner} produced unparseable output: {reason}")]
    UnparseableOutput {
        /// Scanner name.
        scanner: String,
        /// Parse failure detail.
        reason: String,
    },
}

/// A pluggable security scanner.
pub trait SecurityScanner: Send + Sync {
    /// The scanner's registered name (`gitleaks`, `cargo-audit`, ...).
    fn name(&self) -> &str;

    /// The category of findings this scanner produces.
    fn category(&self) -> FindingCategory;

    /// Whether the underlying tool is installed and runnable.
    fn is_available(&self) -> bool;

    /// Runs the scanner against `path` and returns normalized findings.
    ///
    /// # Errors
    ///
    /// Returns [`ScannerError`] on execution or parse failure.
    fn scan(&self, path: &std::path::Path) -> Result<Vec<SecurityFinding>, ScannerError>;
}

/// Per-scanner outcome inside a [`ScanSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerOutcome {
    /// Scanner name.
    pub scanner: String,
    /// `completed`, `skipped`, or `failed`.
    pub status: String,
    /// Number of findings produced.
    pub findings: usize,
    /// Reason when skipped or failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Aggregate result of one scan pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Scan batch id.
    pub scan_id: String,
    /// Total findings across all scanners.
    pub total_findings: usize,
    /// Findings counted by severity string.
    pub severity_counts: std::collections::BTreeMap<String, u64>,
    /// Per-scanner outcomes.
    pub scanners: Vec<ScannerOutcome>,
}

/// Runs every scanner against `path`, persists findings, and emits
/// `security.scan.*` events. Unavailable scanners are recorded as
/// skipped; a scanner failure is recorded and does not abort the pass.
///
/// # Errors
///
/// Returns [`StoreError`] only on persistence faults.
pub fn run_scan(
    log: &EventLog,
    scanners: &[Box<dyn SecurityScanner>],
    path: &std::path::Path,
    intent_id: Option<&str>,
    tenant_id: Option<&str>,
    trace_id: &str,
) -> Result<ScanSummary, StoreError> {
    let scan_id = new_id();
    let names: Vec<&str> = scanners.iter().map(|s| s.name()).collect();

    log.append(
        Event::new(
            EventType::SecurityScanStarted,
            json!({"scan_id": scan_id, "scanners": names, "path": path.display().to_string()}),
        )
        .with_trace(trace_id)
        .with_tenant(tenant_id.map(str::to_string))
        .maybe_intent(intent_id),
    )?;

    let mut all: Vec<SecurityFinding> = Vec::new();
    let mut outcomes = Vec::new();

    for scanner in scanners {
        if !scanner.is_available() {
            tracing::debug!(scanner = scanner.name(), "scanner not installed, skipping");
            outcomes.push(ScannerOutcome {
                scanner: scanner.name().to_string(),
                status: "skipped".to_string(),
                findings: 0,
                reason: Some("not installed".to_string()),
            });
            continue;
        }
        match scanner.scan(path) {
            Ok(mut findings) => {
                for f in &mut findings {
                    f.scan_id = Some(scan_id.clone());
                    f.intent_id = intent_id.map(str::to_string);
                    f.tenant_id = tenant_id.map(str::to_string);
                }
                outcomes.push(ScannerOutcome {
                    scanner: scanner.name().to_string(),
                    status: "completed".to_string(),
                    findings: findings.len(),
                    reason: None,
                });
                all.extend(findings);
            }
            Err(err) => {
                tracing::warn!(scanner = scanner.name(), error = %err, "scanner failed");
                outcomes.push(ScannerOutcome {
                    scanner: scanner.name().to_string(),
                    status: "failed".to_string(),
                    findings: 0,
                    reason: Some(err.to_string()),
                });
            }
        }
    }

    // Persist findings; emit an event per critical/high finding.
    for finding in &all {
        log.store().upsert_security_finding(finding)?;
        if matches!(
            finding.severity,
            FindingSeverity::Critical | FindingSeverity::High
        ) {
            log.append(
                Event::new(
                    EventType::SecurityFindingDetected,
                    json!({"scan_id": scan_id, "finding": finding}),
                )
                .with_trace(trace_id)
                .with_tenant(tenant_id.map(str::to_string))
                .maybe_intent(intent_id),
            )?;
        }
    }

    let mut severity_counts = std::collections::BTreeMap::new();
    for finding in &all {
        *severity_counts
            .entry(finding.severity.as_str().to_string())
            .or_insert(0) += 1;
    }

    let summary = ScanSummary {
        scan_id: scan_id.clone(),
        total_findings: all.len(),
        severity_counts,
        scanners: outcomes,
    };

    log.append(
        Event::new(EventType::SecurityScanCompleted, json!(summary))
            .with_trace(trace_id)
            .with_tenant(tenant_id.map(str::to_string))
            .maybe_intent(intent_id),
    )?;

    Ok(summary)
}
