//! # contract: process-execution interface for orchestration code
//!
//! The upgrade orchestration never spawns child processes directly: every
//! `git`, `pip3` and `ansible-playbook` invocation goes through the
//! [`ProcessRunner`] trait. The only production implementor is
//! [`SystemRunner`], a thin wrapper around `std::process::Command`.
//!
//! ## Mocking & Testing
//! The trait is annotated for `mockall` so tests can substitute a
//! deterministic mock and assert on the exact command sequences without
//! touching a real repository or cluster.

use std::path::Path;
use std::process::Command;

use thiserror::Error;
use tracing::debug;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

/// Errors raised when launching or waiting on a child process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The program could not be started at all.
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran but reported failure.
    #[error("{program} {args:?} exited with {status}")]
    NonZero {
        program: String,
        args: Vec<String>,
        status: std::process::ExitStatus,
    },
}

/// Interface for running external commands.
///
/// Implementors run the command to completion; both methods fail on a
/// non-zero exit status.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait ProcessRunner {
    /// Run a command, inheriting the parent's stdio.
    fn run<'a>(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&'a Path>,
    ) -> Result<(), ProcessError>;

    /// Run a command and capture its trimmed stdout.
    fn run_capture<'a>(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&'a Path>,
    ) -> Result<String, ProcessError>;
}

/// [`ProcessRunner`] backed by `std::process::Command`.
pub struct SystemRunner;

impl SystemRunner {
    fn command(program: &str, args: &[String], cwd: Option<&Path>) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl ProcessRunner for SystemRunner {
    fn run<'a>(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&'a Path>,
    ) -> Result<(), ProcessError> {
        debug!(program, ?args, "Executing command");
        let status = Self::command(program, args, cwd)
            .status()
            .map_err(|e| ProcessError::Spawn {
                program: program.to_string(),
                source: e,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(ProcessError::NonZero {
                program: program.to_string(),
                args: args.to_vec(),
                status,
            })
        }
    }

    fn run_capture<'a>(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&'a Path>,
    ) -> Result<String, ProcessError> {
        debug!(program, ?args, "Executing command (capturing output)");
        let output = Self::command(program, args, cwd)
            .output()
            .map_err(|e| ProcessError::Spawn {
                program: program.to_string(),
                source: e,
            })?;
        if !output.status.success() {
            return Err(ProcessError::NonZero {
                program: program.to_string(),
                args: args.to_vec(),
                status: output.status,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
