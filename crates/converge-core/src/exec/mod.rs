//! Bounded subprocess execution.
//!
//! Every external command Converge runs (verification checks, coherence
//! probes, security scanners) goes through [`run_command`]: spawn with
//! piped output, drain the pipes on reader threads, poll for exit, and
//! kill the child when the hard deadline passes. Captured output is
//! truncated to a byte cap so a noisy tool cannot flood the event log.

#[cfg(test)]
mod tests;

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Poll interval while waiting for child exit.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Errors raised when a subprocess cannot be executed at all.
///
/// A non-zero exit or a timeout is not an error; it is reported in
/// [`ExecOutput`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecError {
    /// The program could not be spawned.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program path.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the child failed.
    #[error("failed to wait on {program}: {source}")]
    Wait {
        /// Program path.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Captured result of a bounded subprocess run.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Exit code, if the process exited normally.
    pub status_code: Option<i32>,
    /// Captured stdout, truncated to the byte cap.
    pub stdout: String,
    /// Captured stderr, truncated to the byte cap.
    pub stderr: String,
    /// Whether the hard deadline killed the process.
    pub timed_out: bool,
    /// Wall-clock duration of the run.
    pub duration: Duration,
}

impl ExecOutput {
    /// True when the process exited zero within the deadline.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.timed_out && self.status_code == Some(0)
    }
}

/// Checks whether `program` can be spawned at all (`--version` probe).
#[must_use]
pub fn program_available(program: &Path) -> bool {
    Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .and_then(|mut child| child.wait())
        .is_ok()
}

/// Runs `program` with `args`, killing it after `timeout` and capping
/// each captured stream at `output_limit` bytes.
///
/// # Errors
///
/// Returns [`ExecError`] only when the process cannot be spawned or
/// waited on; timeouts and non-zero exits are reported in the output.
pub fn run_command(
    program: &Path,
    args: &[String],
    workdir: Option<&Path>,
    timeout: Duration,
    output_limit: usize,
) -> Result<ExecOutput, ExecError> {
    let started = Instant::now();
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = workdir {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|source| ExecError::Spawn {
        program: program.display().to_string(),
        source,
    })?;

    // Drain pipes on reader threads so a full pipe can never deadlock
    // the wait loop.
    let stdout_handle = child.stdout.take().map(|pipe| spawn_reader(pipe, output_limit));
    let stderr_handle = child.stderr.take().map(|pipe| spawn_reader(pipe, output_limit));

    let deadline = started + timeout;
    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if Instant::now() >= deadline {
                    timed_out = true;
                    let _ = child.kill();
                    let _ = child.wait();
                    break None;
                }
                std::thread::sleep(WAIT_POLL);
            }
            Err(source) => {
                let _ = child.kill();
                return Err(ExecError::Wait {
                    program: program.display().to_string(),
                    source,
                });
            }
        }
    };

    let stdout = stdout_handle.map(join_reader).unwrap_or_default();
    let stderr = stderr_handle.map(join_reader).unwrap_or_default();

    Ok(ExecOutput {
        status_code: status.and_then(|s| s.code()),
        stdout,
        stderr,
        timed_out,
        duration: started.elapsed(),
    })
}

/// Runs a shell command line (`sh -c`) under the same bounds.
///
/// # Errors
///
/// See [`run_command`].
pub fn run_shell(
    command_line: &str,
    workdir: Option<&Path>,
    timeout: Duration,
    output_limit: usize,
) -> Result<ExecOutput, ExecError> {
    run_command(
        Path::new("sh"),
        &["-c".to_string(), command_line.to_string()],
        workdir,
        timeout,
        output_limit,
    )
}

fn spawn_reader<R: Read + Send + 'static>(
    mut pipe: R,
    limit: usize,
) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut captured: Vec<u8> = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if captured.len() < limit {
                        let take = n.min(limit - captured.len());
                        captured.extend_from_slice(&buf[..take]);
                    }
                    // Keep draining past the cap so the child never blocks.
                }
            }
        }
        String::from_utf8_lossy(&captured).into_owned()
    })
}

fn join_reader(handle: std::thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}
