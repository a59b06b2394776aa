//! Local process execution with captured output.
//!
//! Every external tool the crate drives (the cloud CLI, `ssh`, `ssh-keygen`)
//! goes through [`CommandRunner`] so higher layers can be exercised with a
//! scripted double instead of real processes.

use std::ffi::OsString;
use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::thread;

use thiserror::Error;

/// Captured result of a finished process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the OS, if any.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns true when the process exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Human readable exit status used in error messages.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Errors raised when a process cannot be driven at all.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when feeding standard input to a running command fails.
    #[error("failed to write stdin of {program}: {message}")]
    Stdin {
        /// Command whose input pipe failed.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Abstraction over process execution.
pub trait CommandRunner {
    /// Runs `program` with `args` and captures its output.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Spawn`] when the process cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ExecError>;

    /// Runs `program` with `args`, writing `input` to its standard input
    /// before waiting for completion.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Spawn`] when the process cannot be started and
    /// [`ExecError::Stdin`] when the input cannot be delivered. A child that
    /// exits without reading all of its input is not an error.
    fn run_with_input(
        &self,
        program: &str,
        args: &[OsString],
        input: &[u8],
    ) -> Result<CommandOutput, ExecError>;
}

/// Runs commands using [`std::process::Command`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ExecError> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| spawn_error(program, &err))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn run_with_input(
        &self,
        program: &str,
        args: &[OsString],
        input: &[u8],
    ) -> Result<CommandOutput, ExecError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| spawn_error(program, &err))?;

        // Input is fed from its own thread so a child that fills its output
        // pipes before draining stdin cannot deadlock.
        let pipe = child.stdin.take();
        let (finished, written) = thread::scope(|scope| {
            let writer = pipe.map(|mut stdin| scope.spawn(move || stdin.write_all(input)));
            (
                child.wait_with_output(),
                writer.map_or(Ok(()), |handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(io::Error::other("stdin writer panicked")))
                }),
            )
        });

        let output = finished.map_err(|err| spawn_error(program, &err))?;
        // A child may exit without reading everything; its status says why.
        if let Err(err) = written
            && err.kind() != io::ErrorKind::BrokenPipe
        {
            return Err(ExecError::Stdin {
                program: program.to_owned(),
                message: err.to_string(),
            });
        }

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn spawn_error(program: &str, err: &std::io::Error) -> ExecError {
    ExecError::Spawn {
        program: program.to_owned(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some(0), true)]
    #[case(Some(1), false)]
    #[case(Some(255), false)]
    #[case(None, false)]
    fn is_success_requires_zero_exit(#[case] code: Option<i32>, #[case] expected: bool) {
        let output = CommandOutput {
            code,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(output.is_success(), expected);
    }

    #[test]
    fn status_text_reports_unknown_without_code() {
        let output = CommandOutput {
            code: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(output.status_text(), "unknown");
    }

    #[test]
    fn process_runner_reports_missing_program() {
        let err = ProcessCommandRunner
            .run("/nonexistent/diskops-test-binary", &[])
            .expect_err("spawning a missing binary should fail");
        assert!(
            matches!(err, ExecError::Spawn { ref program, .. } if program == "/nonexistent/diskops-test-binary"),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn process_runner_feeds_stdin() {
        let output = ProcessCommandRunner
            .run_with_input("cat", &[], b"hello from stdin")
            .unwrap_or_else(|err| panic!("cat should run: {err}"));
        assert!(output.is_success());
        assert_eq!(output.stdout, "hello from stdin");
    }

    #[test]
    fn process_runner_streams_input_larger_than_a_pipe_buffer() {
        let input = vec![b'x'; 1 << 20];
        let output = ProcessCommandRunner
            .run_with_input("cat", &[], &input)
            .unwrap_or_else(|err| panic!("cat should run: {err}"));
        assert!(output.is_success());
        assert_eq!(output.stdout.len(), input.len());
    }

    #[test]
    fn process_runner_tolerates_a_child_that_ignores_stdin() {
        let input = vec![b'x'; 1 << 20];
        let output = ProcessCommandRunner
            .run_with_input("true", &[], &input)
            .unwrap_or_else(|err| panic!("true should run: {err}"));
        assert!(output.is_success());
        assert!(output.stdout.is_empty());
    }
}
