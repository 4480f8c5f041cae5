//! Source-control port: merge simulation, merge execution, log
//! enumeration.
//!
//! The core never touches a working tree. Simulation uses
//! `git merge-tree --write-tree`, which works entirely in the object
//! database; merge execution happens in a disposable worktree so the
//! live checkout is never modified. [`Scm`] is the port; [`GitScm`] is
//! the production adapter.

mod git;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use git::GitScm;

/// Result of a merge simulation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Simulation {
    /// True when the merge applies cleanly.
    pub mergeable: bool,
    /// Conflicted file paths when not mergeable.
    #[serde(default)]
    pub conflicts: Vec<String>,
    /// Files changed between target and source.
    #[serde(default)]
    pub files_changed: Vec<String>,
    /// Source ref as resolved.
    pub source: String,
    /// Target ref as resolved.
    pub target: String,
    /// Commit sha the target pointed at.
    #[serde(default)]
    pub base_commit: String,
    /// Commit sha the source pointed at.
    #[serde(default)]
    pub head_commit: String,
}

impl Simulation {
    /// A clean simulation over the given files (test/builder helper).
    #[must_use]
    pub fn clean(source: &str, target: &str, files: &[&str]) -> Self {
        Self {
            mergeable: true,
            conflicts: Vec::new(),
            files_changed: files.iter().map(|f| (*f).to_string()).collect(),
            source: source.to_string(),
            target: target.to_string(),
            base_commit: String::new(),
            head_commit: String::new(),
        }
    }
}

/// One commit from the log between two refs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Commit sha.
    pub sha: String,
    /// Author name.
    pub author: String,
    /// Subject line.
    pub message: String,
    /// Files touched by the commit.
    pub files: Vec<String>,
}

/// SCM failures, split by retry semantics: `Transient` is worth one
/// retry; the rest are fatal for the current run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScmError {
    /// A named ref does not resolve.
    #[error("unknown ref: {refname}")]
    NotFoundRef {
        /// The unresolvable ref.
        refname: String,
    },

    /// The repository is unusable.
    #[error("corrupt repository: {reason}")]
    Corrupt {
        /// Corruption detail.
        reason: String,
    },

    /// Transient I/O or lock contention; retry once.
    #[error("transient scm failure: {reason}")]
    Transient {
        /// Failure detail.
        reason: String,
    },

    /// A real merge execution failed after simulation passed.
    #[error("merge execution failed: {reason}")]
    MergeExecution {
        /// Failure detail.
        reason: String,
    },
}

impl ScmError {
    /// True when a single retry is appropriate.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// The source-control port.
pub trait Scm: Send + Sync {
    /// Simulates merging `source` into `target` without touching the
    /// working tree.
    ///
    /// # Errors
    ///
    /// Returns [`ScmError`] on unresolvable refs or repository faults;
    /// conflicts are not errors.
    fn simulate(&self, source: &str, target: &str) -> Result<Simulation, ScmError>;

    /// Executes the merge in an isolated scratch area and returns the
    /// merge commit sha.
    ///
    /// # Errors
    ///
    /// Returns [`ScmError::MergeExecution`] when the merge cannot be
    /// completed.
    fn execute_merge(&self, source: &str, target: &str) -> Result<String, ScmError>;

    /// Enumerates commits reachable from `head` but not `base`.
    ///
    /// # Errors
    ///
    /// Returns [`ScmError`] on unresolvable refs or repository faults.
    fn log_between(&self, base: &str, head: &str) -> Result<Vec<Commit>, ScmError>;
}
