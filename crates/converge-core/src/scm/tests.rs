//! Tests for the SCM port and git adapter.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

use super::git::{parse_conflicts, parse_log};
use super::{GitScm, Scm, ScmError, Simulation};

fn git(repo: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args(args)
        .current_dir(repo)
        .env("GIT_AUTHOR_NAME", "test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .expect("git runs");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

/// Scratch repo with `main` at one commit and a `feature/a` branch
/// adding a file.
fn scratch_repo() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path();
    git(repo, &["init", "-b", "main"]);
    std::fs::write(repo.join("README.md"), "converge test\n").unwrap();
    git(repo, &["add", "."]);
    git(repo, &["commit", "-m", "initial"]);

    git(repo, &["checkout", "-b", "feature/a"]);
    std::fs::write(repo.join("src_auth.rs"), "fn auth() {}\n").unwrap();
    git(repo, &["add", "."]);
    git(repo, &["commit", "-m", "add auth"]);
    git(repo, &["checkout", "main"]);
    dir
}

// =============================================================================
// Simulation against a real repository
// =============================================================================

#[test]
fn test_simulate_clean_merge() {
    let dir = scratch_repo();
    let scm = GitScm::new(dir.path());
    let sim = scm.simulate("feature/a", "main").unwrap();
    assert!(sim.mergeable);
    assert!(sim.conflicts.is_empty());
    assert_eq!(sim.files_changed, vec!["src_auth.rs"]);
    assert!(!sim.base_commit.is_empty());
    assert_ne!(sim.base_commit, sim.head_commit);
}

#[test]
fn test_simulate_conflicting_merge() {
    let dir = scratch_repo();
    let repo = dir.path();
    // Diverge README on both branches.
    std::fs::write(repo.join("README.md"), "main edit\n").unwrap();
    git(repo, &["commit", "-am", "main edit"]);
    git(repo, &["checkout", "feature/a"]);
    std::fs::write(repo.join("README.md"), "feature edit\n").unwrap();
    git(repo, &["commit", "-am", "feature edit"]);
    git(repo, &["checkout", "main"]);

    let scm = GitScm::new(repo);
    let sim = scm.simulate("feature/a", "main").unwrap();
    assert!(!sim.mergeable);
    assert!(sim.conflicts.iter().any(|c| c.contains("README.md")));
}

#[test]
fn test_simulate_unknown_ref() {
    let dir = scratch_repo();
    let scm = GitScm::new(dir.path());
    let err = scm.simulate("no/such/branch", "main").unwrap_err();
    assert!(matches!(err, ScmError::NotFoundRef { .. }));
    assert!(!err.is_transient());
}

#[test]
fn test_execute_merge_advances_target_without_touching_checkout() {
    let dir = scratch_repo();
    let repo = dir.path();
    let scm = GitScm::new(repo);

    let before = Command::new("git")
        .args(["rev-parse", "main"])
        .current_dir(repo)
        .output()
        .unwrap();

    let sha = scm.execute_merge("feature/a", "main").unwrap();
    assert_eq!(sha.len(), 40);

    let after = Command::new("git")
        .args(["rev-parse", "main"])
        .current_dir(repo)
        .output()
        .unwrap();
    assert_ne!(before.stdout, after.stdout);

    // The main checkout still has main's original content: the merge
    // ran in a scratch worktree and only the ref moved.
    assert!(!repo.join("src_auth.rs").exists());
}

#[test]
fn test_log_between_lists_feature_commits() {
    let dir = scratch_repo();
    let scm = GitScm::new(dir.path());
    let commits = scm.log_between("main", "feature/a").unwrap();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].message, "add auth");
    assert_eq!(commits[0].files, vec!["src_auth.rs"]);
}

// =============================================================================
// Output parsing
// =============================================================================

#[test]
fn test_parse_conflicts_from_messages() {
    let stdout = "abc123\n100644 deadbeef 1\tsrc/a.rs\n\
                  CONFLICT (content): Merge conflict in src/a.rs\n";
    let conflicts = parse_conflicts(stdout, "");
    assert_eq!(conflicts, vec!["src/a.rs"]);
}

#[test]
fn test_parse_conflicts_from_stage_entries_only() {
    let stdout = "abc123\n100644 deadbeef 1\tsrc/a.rs\n100644 cafef00d 2\tsrc/a.rs\n\
                  100644 0000aaaa 0\tsrc/clean.rs\n";
    let conflicts = parse_conflicts(stdout, "");
    assert_eq!(conflicts, vec!["src/a.rs"]);
}

#[test]
fn test_parse_log_blocks() {
    let stdout = "---CONVERGE-ENTRY---\nsha1\nalice\nfirst change\nsrc/a.rs\nsrc/b.rs\n\
                  ---CONVERGE-ENTRY---\nsha2\nbob\nsecond change\nsrc/c.rs\n";
    let commits = parse_log(stdout);
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].sha, "sha1");
    assert_eq!(commits[0].files, vec!["src/a.rs", "src/b.rs"]);
    assert_eq!(commits[1].author, "bob");
}

#[test]
fn test_simulation_clean_helper() {
    let sim = Simulation::clean("f/a", "main", &["src/lib.rs"]);
    assert!(sim.mergeable);
    assert_eq!(sim.files_changed, vec!["src/lib.rs"]);
}
