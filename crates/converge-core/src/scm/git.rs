//! Git adapter for the SCM port.
//!
//! Simulation runs `git merge-tree --write-tree <target> <source>`: no
//! working directory, no index, no locks. Merge execution adds a
//! detached worktree in a temp directory, merges there, then advances
//! the target ref; the main checkout is never modified and the worktree
//! is always removed.

use std::path::{Path, PathBuf};
use std::process::Command;

use super::{Commit, Scm, ScmError, Simulation};

/// Log entry separator unlikely to appear in subjects.
const LOG_SEPARATOR: &str = "---CONVERGE-ENTRY---";

/// Upper bound on commits returned by `log_between`.
const LOG_MAX_COMMITS: usize = 400;

/// The production git adapter, rooted at a repository checkout.
pub struct GitScm {
    repo: PathBuf,
}

impl GitScm {
    /// Creates an adapter for the repository at `repo`.
    #[must_use]
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }

    /// Resolves the repository root via `git rev-parse --show-toplevel`.
    ///
    /// # Errors
    ///
    /// Returns [`ScmError::Corrupt`] when `repo` is not a git checkout.
    pub fn discover(repo: impl Into<PathBuf>) -> Result<Self, ScmError> {
        let candidate = Self::new(repo);
        let out = candidate.git(&["rev-parse", "--show-toplevel"], None)?;
        if !out.status.success() {
            return Err(ScmError::Corrupt {
                reason: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        let root = String::from_utf8_lossy(&out.stdout).trim().to_string();
        Ok(Self::new(root))
    }

    fn git(
        &self,
        args: &[&str],
        cwd: Option<&Path>,
    ) -> Result<std::process::Output, ScmError> {
        Command::new("git")
            .args(args)
            .current_dir(cwd.unwrap_or(&self.repo))
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|err| ScmError::Transient {
                reason: format!("git {}: {err}", args.first().unwrap_or(&"")),
            })
    }

    fn rev_parse(&self, refname: &str) -> Result<String, ScmError> {
        let out = self.git(&["rev-parse", "--verify", refname], None)?;
        if out.status.success() {
            Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
        } else {
            Err(ScmError::NotFoundRef {
                refname: refname.to_string(),
            })
        }
    }
}

impl Scm for GitScm {
    fn simulate(&self, source: &str, target: &str) -> Result<Simulation, ScmError> {
        let base_commit = self.rev_parse(target)?;
        let head_commit = self.rev_parse(source)?;

        let merge = self.git(&["merge-tree", "--write-tree", target, source], None)?;
        let diff = self.git(
            &["diff-tree", "--no-commit-id", "--name-only", "-r", target, source],
            None,
        )?;
        let files_changed: Vec<String> = String::from_utf8_lossy(&diff.stdout)
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        if merge.status.success() {
            return Ok(Simulation {
                mergeable: true,
                conflicts: Vec::new(),
                files_changed,
                source: source.to_string(),
                target: target.to_string(),
                base_commit,
                head_commit,
            });
        }

        Ok(Simulation {
            mergeable: false,
            conflicts: parse_conflicts(
                &String::from_utf8_lossy(&merge.stdout),
                &String::from_utf8_lossy(&merge.stderr),
            ),
            files_changed,
            source: source.to_string(),
            target: target.to_string(),
            base_commit,
            head_commit,
        })
    }

    fn execute_merge(&self, source: &str, target: &str) -> Result<String, ScmError> {
        self.rev_parse(source)?;
        self.rev_parse(target)?;

        let scratch = tempfile::Builder::new()
            .prefix("converge-merge-")
            .tempdir()
            .map_err(|err| ScmError::MergeExecution {
                reason: format!("scratch dir: {err}"),
            })?;
        let scratch_path = scratch.path().join("wt");
        let scratch_str = scratch_path.display().to_string();

        let added = self.git(
            &["worktree", "add", "--detach", &scratch_str, target],
            None,
        )?;
        if !added.status.success() {
            return Err(ScmError::MergeExecution {
                reason: format!(
                    "worktree add: {}",
                    String::from_utf8_lossy(&added.stderr).trim()
                ),
            });
        }

        let result = self.merge_in_worktree(source, target, &scratch_path);

        // The worktree is removed on every path; a failed removal only
        // leaves a prunable stray.
        let removed = self.git(&["worktree", "remove", "--force", &scratch_str], None);
        if removed.map(|out| !out.status.success()).unwrap_or(true) {
            let _ = self.git(&["worktree", "prune"], None);
        }

        result
    }

    fn log_between(&self, base: &str, head: &str) -> Result<Vec<Commit>, ScmError> {
        self.rev_parse(base)?;
        self.rev_parse(head)?;
        let range = format!("{base}..{head}");
        let format = format!("{LOG_SEPARATOR}%n%H%n%an%n%s");
        let max = format!("--max-count={LOG_MAX_COMMITS}");
        let out = self.git(
            &["log", &max, &format!("--format={format}"), "--name-only", &range],
            None,
        )?;
        if !out.status.success() {
            return Err(ScmError::Corrupt {
                reason: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(parse_log(&String::from_utf8_lossy(&out.stdout)))
    }
}

impl GitScm {
    fn merge_in_worktree(
        &self,
        source: &str,
        target: &str,
        worktree: &Path,
    ) -> Result<String, ScmError> {
        let message = format!("converge: merge {source} into {target}");
        let merged = self.git(
            &["merge", "--no-ff", source, "-m", &message],
            Some(worktree),
        )?;
        if !merged.status.success() {
            return Err(ScmError::MergeExecution {
                reason: String::from_utf8_lossy(&merged.stderr).trim().to_string(),
            });
        }

        let sha_out = self.git(&["rev-parse", "HEAD"], Some(worktree))?;
        let sha = String::from_utf8_lossy(&sha_out.stdout).trim().to_string();

        let target_ref = format!("refs/heads/{target}");
        let updated = self.git(&["update-ref", &target_ref, &sha], None)?;
        if !updated.status.success() {
            return Err(ScmError::MergeExecution {
                reason: format!(
                    "update-ref: {}",
                    String::from_utf8_lossy(&updated.stderr).trim()
                ),
            });
        }
        Ok(sha)
    }
}

/// Extracts conflicted paths from `merge-tree --write-tree` output.
///
/// Informational messages name the file after "in "; the porcelain
/// section lists conflicted entries as `<mode>\t<path>` lines.
pub(super) fn parse_conflicts(stdout: &str, stderr: &str) -> Vec<String> {
    let mut conflicts: Vec<String> = Vec::new();
    for line in stderr.lines().chain(stdout.lines()) {
        if line.starts_with("CONFLICT") {
            if let Some(path) = line.rsplit(" in ").next() {
                if !path.is_empty() && !path.starts_with("CONFLICT") {
                    conflicts.push(path.trim().to_string());
                }
            }
        }
    }
    if conflicts.is_empty() {
        let mut files: Vec<String> = stdout
            .lines()
            .filter_map(|line| {
                let mut parts = line.split('\t');
                let first = parts.next()?;
                let path = parts.next()?;
                // Conflicted index entries carry stage numbers > 0.
                if first.split(' ').nth(2).is_some_and(|stage| stage != "0") {
                    Some(path.to_string())
                } else {
                    None
                }
            })
            .collect();
        files.sort();
        files.dedup();
        conflicts = files;
    }
    conflicts.sort();
    conflicts.dedup();
    conflicts
}

/// Parses `git log --format=<sep>%n%H%n%an%n%s --name-only` output.
pub(super) fn parse_log(stdout: &str) -> Vec<Commit> {
    let mut commits = Vec::new();
    for block in stdout.split(LOG_SEPARATOR) {
        let lines: Vec<&str> = block
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        if lines.len() < 3 {
            continue;
        }
        commits.push(Commit {
            sha: lines[0].to_string(),
            author: lines[1].to_string(),
            message: lines[2].to_string(),
            files: lines[3..].iter().map(|s| (*s).to_string()).collect(),
        });
    }
    commits
}
