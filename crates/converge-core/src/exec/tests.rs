//! Tests for bounded subprocess execution.

use std::path::Path;
use std::time::Duration;

use super::{run_command, run_shell};

const LIMIT: usize = 2000;

#[test]
fn test_successful_command_captures_stdout() {
    let out = run_shell("echo hello", None, Duration::from_secs(5), LIMIT).unwrap();
    assert!(out.success());
    assert_eq!(out.status_code, Some(0));
    assert_eq!(out.stdout.trim(), "hello");
    assert!(!out.timed_out);
}

#[test]
fn test_nonzero_exit_is_not_an_error() {
    let out = run_shell("echo oops >&2; exit 3", None, Duration::from_secs(5), LIMIT).unwrap();
    assert!(!out.success());
    assert_eq!(out.status_code, Some(3));
    assert_eq!(out.stderr.trim(), "oops");
}

#[test]
fn test_timeout_kills_child() {
    let out = run_shell("sleep 30", None, Duration::from_millis(200), LIMIT).unwrap();
    assert!(out.timed_out);
    assert!(!out.success());
    assert_eq!(out.status_code, None);
    assert!(out.duration < Duration::from_secs(10));
}

#[test]
fn test_output_is_truncated_to_limit() {
    let out = run_shell(
        "yes x | head -c 100000",
        None,
        Duration::from_secs(10),
        64,
    )
    .unwrap();
    assert!(out.stdout.len() <= 64);
}

#[test]
fn test_missing_program_is_spawn_error() {
    let err = run_command(
        Path::new("definitely-not-a-real-binary"),
        &[],
        None,
        Duration::from_secs(1),
        LIMIT,
    )
    .unwrap_err();
    assert!(err.to_string().contains("failed to spawn"));
}

#[test]
fn test_workdir_is_respected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "1").unwrap();
    let out = run_shell("ls", Some(dir.path()), Duration::from_secs(5), LIMIT).unwrap();
    assert!(out.stdout.contains("marker.txt"));
}
