//! Named verification check runner.
//!
//! Checks are named commands (`lint`, `unit_tests`, ...) registered up
//! front. Each run gets a hard 300 s timeout and its captured output is
//! truncated to 2000 bytes: stdout when the check passes, stderr when
//! it fails, so the failure detail survives truncation. An unknown
//! check name is skipped silently: the pipeline never crashes on a
//! profile naming a check this deployment does not define.


use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::exec;

/// Hard per-check timeout.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(300);

/// Captured output cap in bytes.
pub const CHECK_OUTPUT_LIMIT: usize = 2000;

/// Result of one check run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check name.
    pub name: String,
    /// True when the command exited zero within the timeout.
    pub passed: bool,
    /// Truncated stdout (pass) or stderr (fail); `"timeout"` on
    /// deadline kill.
    pub details: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// A registered check command.
#[derive(Debug, Clone)]
struct CheckCommand {
    program: PathBuf,
    args: Vec<String>,
}

/// Runs named checks as bounded subprocesses.
pub struct CheckRunner {
    commands: BTreeMap<String, CheckCommand>,
    workdir: Option<PathBuf>,
    timeout: Duration,
}

impl CheckRunner {
    /// A runner with the conventional `make`-target registry: `lint`,
    /// `unit_tests`, `integration_tests`, `security_scan`,
    /// `contract_tests`.
    #[must_use]
    pub fn with_default_commands() -> Self {
        let mut runner = Self::empty();
        for (name, target) in [
            ("lint", "lint"),
            ("unit_tests", "test"),
            ("integration_tests", "test-integration"),
            ("security_scan", "security-scan"),
            ("contract_tests", "test-contract"),
        ] {
            runner.register(name, "make", &[target]);
        }
        runner
    }

    /// A runner with no registered checks.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            commands: BTreeMap::new(),
            workdir: None,
            timeout: CHECK_TIMEOUT,
        }
    }

    /// Registers (or replaces) a named check command.
    pub fn register(&mut self, name: &str, program: &str, args: &[&str]) {
        self.commands.insert(
            name.to_string(),
            CheckCommand {
                program: PathBuf::from(program),
                args: args.iter().map(|a| (*a).to_string()).collect(),
            },
        );
    }

    /// Sets the working directory for check commands.
    #[must_use]
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    /// Overrides the per-check timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The registered check names.
    #[must_use]
    pub fn known_checks(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }

    /// Runs one named check. Returns `None` for unregistered names
    /// (skipped, never an error).
    #[must_use]
    pub fn run(&self, name: &str) -> Option<CheckResult> {
        let command = self.commands.get(name)?;
        let result = exec::run_command(
            &command.program,
            &command.args,
            self.workdir.as_deref(),
            self.timeout,
            CHECK_OUTPUT_LIMIT,
        );

        Some(match result {
            Ok(output) => {
                let passed = output.success();
                let details = if output.timed_out {
                    "timeout".to_string()
                } else if passed {
                    output.stdout
                } else {
                    output.stderr
                };
                CheckResult {
                    name: name.to_string(),
                    passed,
                    details,
                    duration_ms: output.duration.as_millis() as u64,
                }
            }
            Err(err) => CheckResult {
                name: name.to_string(),
                passed: false,
                details: err.to_string(),
                duration_ms: 0,
            },
        })
    }

    /// Runs every requested check, silently skipping unknown names.
    #[must_use]
    pub fn run_all(&self, names: &[String]) -> Vec<CheckResult> {
        names
            .iter()
            .filter_map(|name| {
                let result = self.run(name);
                if result.is_none() {
                    tracing::debug!(check = %name, "unknown check name, skipping");
                }
                result
            })
            .collect()
    }
}
