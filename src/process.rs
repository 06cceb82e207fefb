//! Argument-vector subprocess execution with a deadline.
//!
//! Programs are never started through a shell. A child that outlives its
//! timeout, or is still running when the operator forces a stop, is killed and
//! reaped before the call returns.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use wait_timeout::ChildExt;

use crate::config::constants;
use crate::error::ProcessError;
use crate::shutdown::Shutdown;

/// Result of a program that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the program was terminated by a signal.
    pub code: Option<i32>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// The last few lines of stderr, enough to diagnose a failure in a log line.
    pub fn stderr_tail(&self) -> String {
        tail_lines(&self.stderr, 8)
    }
}

/// Runs external programs. The capture driver and the video assembler only
/// talk to the outside world through this seam.
pub trait CommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ProcessError>;
}

/// Runs programs on the host. A forced stop cancels them; a first stop
/// request does not, so the final assembly can still finish.
pub struct SystemRunner {
    shutdown: Shutdown,
}

impl SystemRunner {
    pub fn new(shutdown: Shutdown) -> Self {
        Self { shutdown }
    }
}

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ProcessError> {
        if self.shutdown.is_forced() {
            return Err(ProcessError::Cancelled {
                program: program.to_string(),
            });
        }

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProcessError::SpawnFailed {
                program: program.to_string(),
                reason: e.to_string(),
            })?;

        // Drain stderr on its own thread so a chatty encoder can't block on a full pipe.
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });
        let collect_stderr = |reader: Option<thread::JoinHandle<String>>| {
            reader
                .and_then(|handle| handle.join().ok())
                .unwrap_or_default()
        };

        let deadline = Instant::now() + timeout;
        let slice = Duration::from_millis(constants::SHUTDOWN_POLL_MILLIS);

        loop {
            let wait = slice.min(deadline.saturating_duration_since(Instant::now()));
            let status = match child.wait_timeout(wait) {
                Ok(status) => status,
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    collect_stderr(stderr_reader);
                    return Err(ProcessError::WaitFailed {
                        program: program.to_string(),
                        reason: e.to_string(),
                    });
                }
            };

            if let Some(status) = status {
                let stderr = collect_stderr(stderr_reader);
                debug!("'{}' exited with {:?}", program, status.code());
                return Ok(CommandOutput {
                    code: status.code(),
                    stderr,
                });
            }

            let cancelled = self.shutdown.is_forced();
            if cancelled || Instant::now() >= deadline {
                if let Err(e) = child.kill() {
                    warn!("Failed to kill '{}': {}", program, e);
                }
                let _ = child.wait();
                collect_stderr(stderr_reader);

                return Err(if cancelled {
                    ProcessError::Cancelled {
                        program: program.to_string(),
                    }
                } else {
                    ProcessError::TimedOut {
                        program: program.to_string(),
                        timeout_seconds: timeout.as_secs(),
                    }
                });
            }
        }
    }
}

/// Keep only the last `n` non-empty lines of `text`.
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Render an argument vector for logging.
pub fn display_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn captures_exit_code_and_stderr() {
        let runner = SystemRunner::new(Shutdown::new());
        let output = runner
            .run("sh", &sh("echo boom >&2; exit 3"), Duration::from_secs(5))
            .unwrap();
        assert_eq!(output.code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stderr_tail(), "boom");
    }

    #[test]
    fn kills_program_past_its_deadline() {
        let runner = SystemRunner::new(Shutdown::new());
        let start = Instant::now();
        let err = runner
            .run("sleep", &["5".to_string()], Duration::from_millis(300))
            .unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_program_is_a_spawn_failure() {
        let runner = SystemRunner::new(Shutdown::new());
        let err = runner
            .run("definitely-not-a-real-program-xyz", &[], Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ProcessError::SpawnFailed { .. }));
    }

    #[test]
    fn first_stop_request_lets_programs_finish() {
        let shutdown = Shutdown::new();
        shutdown.request();
        let runner = SystemRunner::new(shutdown);
        let output = runner.run("true", &[], Duration::from_secs(5)).unwrap();
        assert!(output.success());
    }

    #[test]
    fn refuses_to_start_after_forced_stop() {
        let shutdown = Shutdown::new();
        shutdown.request();
        shutdown.request();
        let runner = SystemRunner::new(shutdown);
        let err = runner
            .run("true", &[], Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled { .. }));
    }

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail_lines("a\n\nb\nc\n", 2), "b\nc");
        assert_eq!(tail_lines("", 3), "");
    }
}
