//! Shell commands on remote instances over SSH.
//!
//! [`RemoteRunner`] never fails: spawn errors, transport failures and
//! non-zero exits all come back as a [`RemoteExecResult`], and the caller
//! classifies the outcome with [`RemoteExecResult::outcome`]. Success means
//! a zero exit status and an empty diagnostic stream.

use std::ffi::OsString;
use std::net::IpAddr;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, error, info};

use crate::console::Console;
use crate::exec::CommandRunner;
use crate::local_fs;

mod classify;

pub use classify::{TransportFailure, classify};

/// SSH client settings shared by every remote invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshSettings {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Login user on the instance.
    pub user: String,
    /// Known hosts file; `/dev/null` keeps hosts with recycled addresses
    /// from tripping host key checks.
    pub known_hosts_file: String,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
}

/// What to run on the instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RemoteCommand {
    /// A shell command line.
    Inline(String),
    /// A local script streamed to `bash -s` on the instance.
    Script(Utf8PathBuf),
}

impl RemoteCommand {
    /// Builds an inline command.
    #[must_use]
    pub fn inline(command: impl Into<String>) -> Self {
        Self::Inline(command.into())
    }

    /// Short description for logs and reports.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Inline(command) => command.clone(),
            Self::Script(path) => format!("script {path}"),
        }
    }
}

/// How a result is presented to the operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Emphasis {
    /// Informational output such as `df -h`, shown plainly.
    Info,
    /// A mutating step whose success is highlighted.
    Action,
}

/// Raw outcome of one remote invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteExecResult {
    /// Remote standard output.
    pub stdout: String,
    /// Diagnostics from the remote command or the SSH client.
    pub stderr: String,
    /// Exit status of the SSH client, if it ran.
    pub exit_code: Option<i32>,
}

/// Classified outcome of a [`RemoteExecResult`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RemoteOutcome {
    /// Zero exit status and nothing on stderr.
    Success,
    /// Anything else, with the recognised transport cause.
    Failure(TransportFailure),
}

impl RemoteExecResult {
    /// Returns true for a zero exit status with an empty diagnostic stream.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0) && self.stderr.trim().is_empty()
    }

    /// Classifies the result.
    #[must_use]
    pub fn outcome(&self) -> RemoteOutcome {
        if self.is_success() {
            RemoteOutcome::Success
        } else {
            RemoteOutcome::Failure(classify(&self.stderr))
        }
    }

    /// Operator-facing description of a failure.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_owned();
        }
        match self.exit_code {
            Some(code) => format!("remote command exited with status {code}"),
            None => String::from("remote command terminated without an exit status"),
        }
    }

    const fn local_failure(message: String) -> Self {
        Self {
            stdout: String::new(),
            stderr: message,
            exit_code: None,
        }
    }
}

/// Executes commands on instances through the `ssh` client.
#[derive(Clone, Debug)]
pub struct RemoteRunner<R: CommandRunner> {
    settings: SshSettings,
    runner: R,
}

impl<R: CommandRunner> RemoteRunner<R> {
    /// Creates a runner using `settings` and the process `runner`.
    #[must_use]
    pub const fn new(settings: SshSettings, runner: R) -> Self {
        Self { settings, runner }
    }

    /// Runs `command` on `host` authenticating with `key`.
    ///
    /// Local failures (missing `ssh` binary, unreadable script) are reported
    /// through the result's diagnostic stream.
    #[must_use]
    pub fn run(&self, key: &Utf8Path, host: IpAddr, command: &RemoteCommand) -> RemoteExecResult {
        let mut args = self.connection_args(key, host);
        debug!(%host, command = %command.label(), "running remote command");

        let spawned = match command {
            RemoteCommand::Inline(line) => {
                args.push(OsString::from(line));
                self.runner.run(&self.settings.ssh_bin, &args)
            }
            RemoteCommand::Script(path) => {
                let script = match local_fs::read_bytes(path) {
                    Ok(script) => script,
                    Err(message) => {
                        return RemoteExecResult::local_failure(format!(
                            "failed to read script {path}: {message}"
                        ));
                    }
                };
                args.push(OsString::from("bash -s"));
                self.runner
                    .run_with_input(&self.settings.ssh_bin, &args, &script)
            }
        };

        match spawned {
            Ok(output) => RemoteExecResult {
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: output.code,
            },
            Err(err) => RemoteExecResult::local_failure(err.to_string()),
        }
    }

    /// Runs `command` and reports the raw result to `console` and the log.
    ///
    /// Failures are printed in full and returned for the caller's report;
    /// they never abort the caller.
    pub fn execute(
        &self,
        console: &impl Console,
        key: &Utf8Path,
        host: IpAddr,
        command: &RemoteCommand,
        emphasis: Emphasis,
    ) -> RemoteExecResult {
        let result = self.run(key, host, command);
        let label = command.label();
        if result.is_success() {
            info!(%host, command = %label, "remote command succeeded");
            let body = result.stdout.trim_end();
            match emphasis {
                Emphasis::Info => console.status(body),
                Emphasis::Action => console.success(&format!("{label}: {body}")),
            }
        } else {
            error!(
                %host,
                command = %label,
                exit_code = ?result.exit_code,
                stderr = %result.stderr,
                "remote command failed"
            );
            console.failure(&format!("{label}: {}", result.diagnostic()));
        }
        result
    }

    fn connection_args(&self, key: &Utf8Path, host: IpAddr) -> Vec<OsString> {
        let settings = &self.settings;
        vec![
            OsString::from("-i"),
            OsString::from(key.as_str()),
            OsString::from("-o"),
            OsString::from("StrictHostKeyChecking=no"),
            OsString::from("-o"),
            OsString::from(format!("UserKnownHostsFile={}", settings.known_hosts_file)),
            OsString::from("-o"),
            OsString::from("LogLevel=ERROR"),
            OsString::from("-o"),
            OsString::from("BatchMode=yes"),
            OsString::from("-o"),
            OsString::from(format!("ConnectTimeout={}", settings.connect_timeout_secs)),
            OsString::from(format!("{}@{host}", settings.user)),
        ]
    }
}

#[cfg(test)]
mod tests;
