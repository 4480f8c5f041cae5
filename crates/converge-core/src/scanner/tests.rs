//! Tests for the scanner port.

use std::path::Path;
use std::sync::Arc;

use super::{
    CommandScanner, FindingCategory, FindingSeverity, ScannerError, SecurityFinding,
    SecurityScanner, run_scan,
};
use crate::event::EventType;
use crate::log::EventLog;
use crate::store::{EventFilter, SqliteStore, Store};

fn open_log() -> (tempfile::TempDir, EventLog) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("state.db")).unwrap());
    (dir, EventLog::new(store))
}

/// Scriptable scanner double.
struct StubScanner {
    name: &'static str,
    available: bool,
    findings: Vec<SecurityFinding>,
    fails: bool,
}

impl SecurityScanner for StubScanner {
    fn name(&self) -> &str {
        self.name
    }

    fn category(&self) -> FindingCategory {
        FindingCategory::Sast
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn scan(&self, _path: &Path) -> Result<Vec<SecurityFinding>, ScannerError> {
        if self.fails {
            return Err(ScannerError::Execution {
                scanner: self.name.to_string(),
                reason: "boom".to_string(),
            });
        }
        Ok(self.findings.clone())
    }
}

fn finding(severity: FindingSeverity) -> SecurityFinding {
    SecurityFinding::new("stub", FindingCategory::Sast, severity)
}

// =============================================================================
// Normalization
// =============================================================================

#[test]
fn test_secrets_forced_high_with_truncated_evidence() {
    let mut raw = SecurityFinding::new("gitleaks", FindingCategory::Secrets, FindingSeverity::Low);
    raw.rule = "aws-access-key".to_string();
    raw.evidence = "AKIAIOSFODNN7EXAMPLEKEYMATERIAL".to_string();
    let normalized = raw.normalized();
    assert_eq!(normalized.severity, FindingSeverity::High);
    assert!(normalized.evidence.starts_with("aws-access-key: AKIAIOSF"));
    assert!(!normalized.evidence.contains("EXAMPLEKEYMATERIAL"));
}

#[test]
fn test_secrets_empty_evidence_keeps_rule_only() {
    let mut raw = SecurityFinding::new("gitleaks", FindingCategory::Secrets, FindingSeverity::Info);
    raw.rule = "generic-token".to_string();
    let normalized = raw.normalized();
    assert_eq!(normalized.evidence, "generic-token");
}

#[test]
fn test_non_secrets_untouched_by_normalization() {
    let mut raw = SecurityFinding::new("audit", FindingCategory::Sca, FindingSeverity::Low);
    raw.evidence = "CVE-2024-0001 in dep 1.2.3".to_string();
    let normalized = raw.clone().normalized();
    assert_eq!(normalized.severity, FindingSeverity::Low);
    assert_eq!(normalized.evidence, raw.evidence);
}

#[test]
fn test_severity_parse_lenient() {
    assert_eq!(FindingSeverity::parse_lenient("critical"), FindingSeverity::Critical);
    assert_eq!(FindingSeverity::parse_lenient("error"), FindingSeverity::High);
    assert_eq!(FindingSeverity::parse_lenient("warning"), FindingSeverity::Medium);
    assert_eq!(FindingSeverity::parse_lenient("???"), FindingSeverity::Info);
}

// =============================================================================
// Command scanner
// =============================================================================

#[test]
fn test_command_scanner_parses_json_findings() {
    let payload = r#"[{"severity": "high", "file": "src/a.rs", "line": 3,
                       "rule": "sql-injection", "evidence": "query(raw)"}]"#;
    let scanner = CommandScanner::new(
        "fake-sast",
        FindingCategory::Sast,
        "sh",
        vec!["-c".to_string(), format!("echo '{payload}'")],
    );
    let findings = scanner.scan(Path::new(".")).unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].severity, FindingSeverity::High);
    assert_eq!(findings[0].file, "src/a.rs");
    assert_eq!(findings[0].scanner, "fake-sast");
}

#[test]
fn test_command_scanner_rejects_non_json_output() {
    let scanner = CommandScanner::new(
        "broken",
        FindingCategory::Sast,
        "sh",
        vec!["-c".to_string(), "echo not-json".to_string()],
    );
    assert!(matches!(
        scanner.scan(Path::new(".")),
        Err(ScannerError::UnparseableOutput { .. })
    ));
}

// =============================================================================
// Scan orchestration
// =============================================================================

#[test]
fn test_run_scan_persists_and_summarizes() {
    let (_dir, log) = open_log();
    let scanners: Vec<Box<dyn SecurityScanner>> = vec![Box::new(StubScanner {
        name: "stub",
        available: true,
        findings: vec![
            finding(FindingSeverity::Critical),
            finding(FindingSeverity::High),
            finding(FindingSeverity::Low),
        ],
        fails: false,
    })];

    let summary = run_scan(&log, &scanners, Path::new("."), Some("i1"), None, "trace-1").unwrap();
    assert_eq!(summary.total_findings, 3);
    assert_eq!(summary.severity_counts["critical"], 1);

    // Findings persisted with the scan context attached.
    let counts = log.store().count_findings(Some("i1"), None).unwrap();
    assert_eq!(counts.values().sum::<u64>(), 3);

    // Scan lifecycle events plus one event per critical/high finding.
    assert!(log.latest_of(EventType::SecurityScanStarted, Some("i1")).unwrap().is_some());
    assert!(log.latest_of(EventType::SecurityScanCompleted, Some("i1")).unwrap().is_some());
    let detected = log
        .query(&EventFilter::of_type(EventType::SecurityFindingDetected))
        .unwrap();
    assert_eq!(detected.len(), 2);
}

#[test]
fn test_missing_scanner_is_skipped_and_recorded() {
    let (_dir, log) = open_log();
    let scanners: Vec<Box<dyn SecurityScanner>> = vec![Box::new(StubScanner {
        name: "absent",
        available: false,
        findings: Vec::new(),
        fails: false,
    })];

    let summary = run_scan(&log, &scanners, Path::new("."), None, None, "trace-2").unwrap();
    assert_eq!(summary.total_findings, 0);
    assert_eq!(summary.scanners[0].status, "skipped");
    assert_eq!(summary.scanners[0].reason.as_deref(), Some("not installed"));
}

#[test]
fn test_failing_scanner_does_not_abort_pass() {
    let (_dir, log) = open_log();
    let scanners: Vec<Box<dyn SecurityScanner>> = vec![
        Box::new(StubScanner {
            name: "broken",
            available: true,
            findings: Vec::new(),
            fails: true,
        }),
        Box::new(StubScanner {
            name: "working",
            available: true,
            findings: vec![finding(FindingSeverity::Medium)],
            fails: false,
        }),
    ];

    let summary = run_scan(&log, &scanners, Path::new("."), None, None, "trace-3").unwrap();
    assert_eq!(summary.total_findings, 1);
    assert_eq!(summary.scanners[0].status, "failed");
    assert_eq!(summary.scanners[1].status, "completed");
}
