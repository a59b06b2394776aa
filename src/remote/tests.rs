//! Tests for SSH invocation, result classification and reporting.

use std::net::{IpAddr, Ipv4Addr};

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};

use super::*;
use crate::test_support::{ConsoleLevel, RecordingConsole, ScriptedRunner};

const HOST: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));

#[fixture]
fn settings() -> SshSettings {
    SshSettings {
        ssh_bin: String::from("ssh"),
        user: String::from("ubuntu"),
        known_hosts_file: String::from("/dev/null"),
        connect_timeout_secs: 10,
    }
}

fn result(code: Option<i32>, stderr: &str) -> RemoteExecResult {
    RemoteExecResult {
        stdout: String::new(),
        stderr: stderr.to_owned(),
        exit_code: code,
    }
}

#[rstest]
#[case("ubuntu@1.2.3.4: Permission denied (publickey).", TransportFailure::KeyRejected)]
#[case(
    "ssh: connect to host 1.2.3.4 port 22: Operation timed out",
    TransportFailure::HostUnreachable
)]
#[case(
    "ssh: connect to host 1.2.3.4 port 22: Connection timed out",
    TransportFailure::HostUnreachable
)]
#[case("bash: growpart: command not found", TransportFailure::Other)]
#[case("", TransportFailure::Other)]
fn classify_recognises_transport_signatures(
    #[case] stderr: &str,
    #[case] expected: TransportFailure,
) {
    assert_eq!(classify(stderr), expected);
}

#[rstest]
#[case(Some(0), "", RemoteOutcome::Success)]
#[case(Some(0), "warning on stderr", RemoteOutcome::Failure(TransportFailure::Other))]
#[case(Some(1), "", RemoteOutcome::Failure(TransportFailure::Other))]
#[case(
    Some(255),
    "Permission denied (publickey).",
    RemoteOutcome::Failure(TransportFailure::KeyRejected)
)]
#[case(None, "", RemoteOutcome::Failure(TransportFailure::Other))]
fn success_requires_zero_exit_and_quiet_stderr(
    #[case] code: Option<i32>,
    #[case] stderr: &str,
    #[case] expected: RemoteOutcome,
) {
    assert_eq!(result(code, stderr).outcome(), expected);
}

#[test]
fn diagnostic_prefers_stderr_then_status() {
    assert_eq!(result(Some(1), "boom\n").diagnostic(), "boom");
    assert_eq!(
        result(Some(3), "").diagnostic(),
        "remote command exited with status 3"
    );
}

#[rstest]
fn inline_command_builds_hardened_ssh_invocation(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    runner.push_stdout("test-ssh\n");
    let remote = RemoteRunner::new(settings, runner.clone());

    let outcome = remote.run(
        Utf8Path::new("/home/me/.ssh/id_rsa"),
        HOST,
        &RemoteCommand::inline("echo test-ssh"),
    );

    assert!(outcome.is_success(), "unexpected result: {outcome:?}");
    let invocations = runner.invocations();
    let [invocation] = invocations.as_slice() else {
        panic!("expected one invocation, got {invocations:?}");
    };
    assert_eq!(
        invocation.command_string(),
        "ssh -i /home/me/.ssh/id_rsa -o StrictHostKeyChecking=no \
         -o UserKnownHostsFile=/dev/null -o LogLevel=ERROR -o BatchMode=yes \
         -o ConnectTimeout=10 ubuntu@203.0.113.7 echo test-ssh"
    );
    assert_eq!(invocation.input, None);
}

#[rstest]
fn script_is_streamed_to_remote_shell(settings: SshSettings) {
    let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let script = Utf8PathBuf::from_path_buf(dir.path().join("cleanup.sh"))
        .unwrap_or_else(|path| panic!("non-UTF-8 path: {}", path.display()));
    std::fs::write(&script, "echo cleaned\n").unwrap_or_else(|err| panic!("write: {err}"));

    let runner = ScriptedRunner::new();
    runner.push_stdout("cleaned\n");
    let remote = RemoteRunner::new(settings, runner.clone());

    let outcome = remote.run(
        Utf8Path::new("key"),
        HOST,
        &RemoteCommand::Script(script),
    );

    assert!(outcome.is_success());
    let invocations = runner.invocations();
    let [invocation] = invocations.as_slice() else {
        panic!("expected one invocation, got {invocations:?}");
    };
    assert!(invocation.command_string().ends_with("ubuntu@203.0.113.7 bash -s"));
    assert_eq!(invocation.input.as_deref(), Some(b"echo cleaned\n".as_slice()));
}

#[rstest]
fn unreadable_script_becomes_failure_result(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    let remote = RemoteRunner::new(settings, runner.clone());

    let outcome = remote.run(
        Utf8Path::new("key"),
        HOST,
        &RemoteCommand::Script(Utf8PathBuf::from("/nonexistent/diskops/script.sh")),
    );

    assert!(!outcome.is_success());
    assert!(outcome.stderr.contains("failed to read script"));
    assert!(runner.invocations().is_empty());
}

#[rstest]
fn spawn_failure_becomes_failure_result(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    let remote = RemoteRunner::new(settings, runner);

    let outcome = remote.run(Utf8Path::new("key"), HOST, &RemoteCommand::inline("true"));

    assert_eq!(outcome.exit_code, None);
    assert!(outcome.stderr.contains("no scripted response available"));
    assert_eq!(
        outcome.outcome(),
        RemoteOutcome::Failure(TransportFailure::Other)
    );
}

#[rstest]
fn execute_reports_output_and_failures(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    runner.push_stdout("Filesystem Size\n");
    runner.push_output(Some(1), "", "resize2fs: Bad magic number");
    let remote = RemoteRunner::new(settings, runner);
    let console = RecordingConsole::new();
    let key = Utf8Path::new("key");

    let info = remote.execute(
        &console,
        key,
        HOST,
        &RemoteCommand::inline("df -h"),
        Emphasis::Info,
    );
    let action = remote.execute(
        &console,
        key,
        HOST,
        &RemoteCommand::inline("sudo resize2fs /dev/nvme0n1p1"),
        Emphasis::Action,
    );

    assert!(info.is_success());
    assert!(!action.is_success());
    assert_eq!(console.at(ConsoleLevel::Status), vec!["Filesystem Size"]);
    assert_eq!(
        console.at(ConsoleLevel::Failure),
        vec!["sudo resize2fs /dev/nvme0n1p1: resize2fs: Bad magic number"]
    );
}
