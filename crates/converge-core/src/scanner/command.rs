//! Command-backed scanner adapter.
//!
//! Wraps any external tool that can emit findings as a JSON array on
//! stdout. The raw records are tolerant (`severity`, `file`, `line`,
//! `rule`, `evidence`, `confidence` all optional) and are normalized
//! into [`SecurityFinding`]s, including the secrets evidence truncation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::{FindingCategory, FindingSeverity, ScannerError, SecurityFinding};
use crate::exec::{self, ExecError};

/// Default per-category scan timeouts.
const SAST_TIMEOUT: Duration = Duration::from_secs(120);
const SCA_TIMEOUT: Duration = Duration::from_secs(180);
const SECRETS_TIMEOUT: Duration = Duration::from_secs(120);

/// Output capture cap for scanner subprocesses.
const SCAN_OUTPUT_LIMIT: usize = 1 << 20;

/// A raw finding record as emitted by the wrapped tool.
#[derive(Debug, Deserialize)]
struct RawFinding {
    #[serde(default)]
    severity: String,
    #[serde(default)]
    file: String,
    #[serde(default)]
    line: u32,
    #[serde(default)]
    rule: String,
    #[serde(default)]
    evidence: String,
    #[serde(default)]
    confidence: Option<String>,
}

/// A scanner adapter that shells out to a JSON-emitting command.
///
/// The scan path is appended as the final argument.
pub struct CommandScanner {
    name: String,
    category: FindingCategory,
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandScanner {
    /// Creates a command scanner with the category's default timeout.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        category: FindingCategory,
        program: impl Into<PathBuf>,
        args: Vec<String>,
    ) -> Self {
        let timeout = match category {
            FindingCategory::Sast => SAST_TIMEOUT,
            FindingCategory::Sca => SCA_TIMEOUT,
            FindingCategory::Secrets => SECRETS_TIMEOUT,
        };
        Self {
            name: name.into(),
            category,
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Overrides the scan timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn parse_findings(&self, stdout: &str) -> Result<Vec<SecurityFinding>, ScannerError> {
        let raw: Vec<RawFinding> =
            serde_json::from_str(stdout.trim()).map_err(|err| ScannerError::UnparseableOutput {
                scanner: self.name.clone(),
                reason: err.to_string(),
            })?;

        Ok(raw
            .into_iter()
            .map(|r| {
                let mut finding = SecurityFinding::new(
                    self.name.clone(),
                    self.category,
                    FindingSeverity::parse_lenient(&r.severity),
                );
                finding.file = r.file;
                finding.line = r.line;
                finding.rule = r.rule;
                finding.evidence = r.evidence;
                if let Some(confidence) = r.confidence {
                    finding.confidence = confidence;
                }
                finding.normalized()
            })
            .collect())
    }
}

impl super::SecurityScanner for CommandScanner {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> FindingCategory {
        self.category
    }

    fn is_available(&self) -> bool {
        exec::program_available(&self.program)
    }

    fn scan(&self, path: &Path) -> Result<Vec<SecurityFinding>, ScannerError> {
        let mut args: Vec<String> = self.args.clone();
        args.push(path.display().to_string());

        let output = exec::run_command(
            &self.program,
            &args,
            None,
            self.timeout,
            SCAN_OUTPUT_LIMIT,
        )
        .map_err(|err: ExecError| ScannerError::Execution {
            scanner: self.name.clone(),
            reason: err.to_string(),
        })?;

        if output.timed_out {
            return Err(ScannerError::Execution {
                scanner: self.name.clone(),
                reason: format!("timed out after {}s", self.timeout.as_secs()),
            });
        }

        // Scanners conventionally exit non-zero when findings exist, so
        // the exit code is not an error signal; unparseable output is.
        self.parse_findings(&output.stdout)
    }
}
