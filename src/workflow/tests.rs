//! Tests for the resize and clean-up workflows.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::rstest;
use tempfile::TempDir;

use super::*;
use crate::bootstrap::KeyPaths;
use crate::cloud::{PowerPolicy, VolumeModification};
use crate::remote::SshSettings;
use crate::retry::RetryPolicy;
use crate::test_support::{
    CloudCall, ConsoleLevel, FakeCloud, PromptAsked, RecordingConsole, ScriptedPrompt,
    ScriptedRunner,
};

const WEB_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));
const DB_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 8));

type TestWorkflows = Workflows<FakeCloud, ScriptedRunner, ScriptedPrompt, RecordingConsole>;

struct Harness {
    _dir: TempDir,
    root: Utf8PathBuf,
    cloud: FakeCloud,
    runner: ScriptedRunner,
    console: RecordingConsole,
    prompt: ScriptedPrompt,
    workflows: TestWorkflows,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-UTF-8 temp path: {}", path.display()));
        std::fs::write(root.join("diskops_rsa"), "managed private key")
            .unwrap_or_else(|err| panic!("write key: {err}"));

        let cloud = FakeCloud::new();
        let runner = ScriptedRunner::new();
        let console = RecordingConsole::new();
        let prompt = ScriptedPrompt::new();

        let interval = Duration::from_secs(10);
        let policy = |attempts| {
            RetryPolicy::new(attempts, interval).unwrap_or_else(|err| panic!("policy: {err}"))
        };
        let bootstrap = BootstrapSettings {
            keys: KeyPaths {
                managed: root.join("diskops_rsa"),
                fallback: root.join("id_rsa"),
            },
            work_dir: root.clone(),
            login_user: String::from("ubuntu"),
            ssh_keygen_bin: String::from("ssh-keygen"),
            ssh_policy: policy(3),
            wake_attempts: 3,
        };
        let workflows = Workflows::new(
            InstanceDirectory::new(
                cloud.clone(),
                Profile::default(),
                PowerPolicy {
                    start: policy(60),
                    stop: policy(30),
                },
            ),
            RemoteRunner::new(
                SshSettings {
                    ssh_bin: String::from("ssh"),
                    user: String::from("ubuntu"),
                    known_hosts_file: String::from("/dev/null"),
                    connect_timeout_secs: 10,
                },
                runner.clone(),
            ),
            KeyGenerator::new("ssh-keygen", runner.clone()),
            prompt.clone(),
            console.clone(),
            bootstrap,
            DiskLayout {
                original_size_gb: 8,
                requested_size_gb: 16,
                root_device: String::from("/dev/nvme0n1"),
                root_partition: 1,
            },
        );

        Self {
            _dir: dir,
            root,
            cloud,
            runner,
            console,
            prompt,
            workflows,
        }
    }

    fn with_web_instance() -> Self {
        let harness = Self::new();
        harness.cloud.add_instance("i-0aaa", "web-1", Some(WEB_IP));
        harness
    }

    /// Queues a successful key check followed by `steps` successful steps.
    fn script_ssh_successes(&self, steps: usize) {
        self.runner.push_stdout("test-ssh\n");
        for _ in 0..steps {
            self.runner.push_stdout("ok\n");
        }
    }

    /// Remote command lines run after the key check.
    fn remote_steps(&self) -> Vec<String> {
        self.runner
            .invocations()
            .iter()
            .skip(1)
            .filter_map(|invocation| invocation.args.last())
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    fn resizes(&self) -> Vec<CloudCall> {
        self.cloud
            .calls()
            .into_iter()
            .filter(|call| matches!(call, CloudCall::ResizeVolume(..)))
            .collect()
    }
}

fn completed_resize(outcome: ResizeOutcome) -> ResizeReport {
    match outcome {
        ResizeOutcome::Completed(report) => report,
        other => panic!("expected a completed resize, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn no_instances_cannot_continue() {
    let harness = Harness::new();

    let err = harness
        .workflows
        .increase_disk_size(ResizeOptions::default())
        .await
        .expect_err("empty account should fail");

    assert_eq!(
        err,
        WorkflowError::NoUsableResource(String::from("No instances found! cannot continue"))
    );
}

#[tokio::test(start_paused = true)]
async fn baseline_volume_is_resized_after_confirmation() {
    let harness = Harness::with_web_instance();
    harness.cloud.add_volume("i-0aaa", "vol-0a1", 8);
    harness.prompt.answer_confirm(true);

    let outcome = harness
        .workflows
        .increase_disk_size(ResizeOptions::default())
        .await
        .expect("resize should succeed");

    let report = completed_resize(outcome);
    assert_eq!(
        report.modification,
        Some(VolumeModification {
            volume_id: String::from("vol-0a1"),
            original_size_gb: 8,
            target_size_gb: 16,
        })
    );
    assert_eq!(report.partition_steps, None);
    assert!(report.is_clean());
    assert_eq!(
        harness.prompt.asked(),
        vec![PromptAsked::Confirm(String::from(
            "This will change Volume [vol-0a1] on instance [i-0aaa - 203.0.113.7] from size \
             [8GB] to size [16GB]. Continue?"
        ))]
    );
    assert!(harness.runner.invocations().is_empty(), "no ssh without partition resize");
    assert!(
        harness
            .console
            .at(ConsoleLevel::Success)
            .contains(&String::from(
                "Successfully changed the size of volume [vol-0a1] from 8GB to 16GB!"
            ))
    );
}

#[tokio::test(start_paused = true)]
async fn declined_confirmation_changes_nothing() {
    let harness = Harness::with_web_instance();
    harness.cloud.add_volume("i-0aaa", "vol-0a1", 8);
    harness.prompt.answer_confirm(false);

    let outcome = harness
        .workflows
        .increase_disk_size(ResizeOptions::default())
        .await
        .expect("declining is not an error");

    assert_eq!(outcome, ResizeOutcome::Declined);
    assert!(harness.resizes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn several_instances_ask_the_operator() {
    let harness = Harness::with_web_instance();
    harness.cloud.add_instance("i-0bbb", "db-1", Some(DB_IP));
    harness.cloud.add_volume("i-0bbb", "vol-0b1", 8);
    harness.prompt.choose_instance(1);
    harness.prompt.answer_confirm(true);

    let report = completed_resize(
        harness
            .workflows
            .increase_disk_size(ResizeOptions::default())
            .await
            .expect("resize should succeed"),
    );

    assert_eq!(report.instance.id, "i-0bbb");
    assert_eq!(harness.prompt.asked().first(), Some(&PromptAsked::Instance));
    assert!(
        harness
            .console
            .at(ConsoleLevel::Warn)
            .iter()
            .any(|line| line.starts_with("More than one instance found"))
    );
    assert_eq!(
        harness.resizes(),
        vec![CloudCall::ResizeVolume(String::from("vol-0b1"), 16)]
    );
}

#[tokio::test(start_paused = true)]
async fn several_baseline_volumes_offer_only_baseline_choices() {
    let harness = Harness::with_web_instance();
    harness.cloud.add_volume("i-0aaa", "vol-0a1", 8);
    harness.cloud.add_volume("i-0aaa", "vol-0a2", 100);
    harness.cloud.add_volume("i-0aaa", "vol-0a3", 8);
    harness.prompt.choose_volume(1);
    harness.prompt.answer_confirm(true);

    let report = completed_resize(
        harness
            .workflows
            .increase_disk_size(ResizeOptions::default())
            .await
            .expect("resize should succeed"),
    );

    assert_eq!(report.volume.id, "vol-0a3");
    assert_eq!(
        harness.prompt.asked().first(),
        Some(&PromptAsked::Volume(
            vec![String::from("vol-0a1"), String::from("vol-0a3")],
            false
        ))
    );
}

#[rstest]
#[case::no_volumes(&[], "No volumes found! cannot continue")]
#[case::already_grown(&[16], "Nothing to do: no 8GB volumes were found")]
#[case::unrelated_sizes(&[30, 100], "Nothing to do: no 8GB volumes were found")]
#[tokio::test(start_paused = true)]
async fn nothing_to_resize_without_partition_growth(
    #[case] sizes: &[u32],
    #[case] message: &str,
) {
    let harness = Harness::with_web_instance();
    for (index, size) in sizes.iter().enumerate() {
        harness
            .cloud
            .add_volume("i-0aaa", &format!("vol-{index}"), *size);
    }

    let err = harness
        .workflows
        .increase_disk_size(ResizeOptions::default())
        .await
        .expect_err("nothing to resize");

    assert_eq!(err, WorkflowError::NoUsableResource(message.to_owned()));
    assert!(harness.prompt.asked().is_empty());
}

#[tokio::test(start_paused = true)]
async fn already_grown_volume_only_grows_the_partition() {
    let harness = Harness::with_web_instance();
    harness.cloud.add_volume("i-0aaa", "vol-0a1", 16);
    harness.prompt.answer_confirm(true);
    harness.script_ssh_successes(5);

    let report = completed_resize(
        harness
            .workflows
            .increase_disk_size(ResizeOptions {
                advanced_mode: false,
                automatic_partition_resize: true,
            })
            .await
            .expect("partition growth should succeed"),
    );

    assert_eq!(report.modification, None);
    assert!(harness.resizes().is_empty());
    assert_eq!(
        report.partition_steps,
        Some(StepReport {
            attempted: 5,
            failed: Vec::new(),
        })
    );
    assert_eq!(
        harness.remote_steps(),
        [
            "lsblk",
            "df -h",
            "sudo growpart /dev/nvme0n1 1",
            "sudo resize2fs /dev/nvme0n1p1",
            "df -h",
        ]
    );
    assert_eq!(
        harness.prompt.asked(),
        vec![PromptAsked::Confirm(String::from(
            "This will attempt automatic resize of partition and file system of [vol-0a1] on \
             instance [i-0aaa - 203.0.113.7]. Continue?"
        ))]
    );
    assert!(
        harness
            .console
            .at(ConsoleLevel::Success)
            .contains(&String::from("increase-disk-size -> Done!"))
    );
    let lines = harness.console.lines();
    let heading = lines
        .iter()
        .position(|(_, line)| line == "current volumes mounted on the instance:")
        .unwrap_or_else(|| panic!("lsblk heading missing: {lines:?}"));
    assert_eq!(
        lines.get(heading + 1),
        Some(&(ConsoleLevel::Status, String::from("ok")))
    );
}

#[tokio::test(start_paused = true)]
async fn advanced_mode_quit_stops_before_ssh() {
    let harness = Harness::with_web_instance();
    harness.cloud.add_volume("i-0aaa", "vol-0a1", 16);
    harness.cloud.add_volume("i-0aaa", "vol-0a2", 50);
    harness.prompt.choose_quit();

    let outcome = harness
        .workflows
        .increase_disk_size(ResizeOptions {
            advanced_mode: true,
            automatic_partition_resize: true,
        })
        .await
        .expect("quit is not an error");

    assert_eq!(outcome, ResizeOutcome::Quit);
    assert_eq!(
        harness.prompt.asked(),
        vec![PromptAsked::Volume(
            vec![String::from("vol-0a1"), String::from("vol-0a2")],
            true
        )]
    );
    assert!(harness.runner.invocations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn advanced_mode_asks_for_the_target_size() {
    let harness = Harness::with_web_instance();
    harness.cloud.add_volume("i-0aaa", "vol-0a1", 8);
    harness.prompt.answer_size(32);
    harness.prompt.answer_confirm(true);

    let report = completed_resize(
        harness
            .workflows
            .increase_disk_size(ResizeOptions {
                advanced_mode: true,
                automatic_partition_resize: false,
            })
            .await
            .expect("resize should succeed"),
    );

    assert_eq!(
        report.modification.map(|modification| modification.target_size_gb),
        Some(32)
    );
    assert_eq!(
        harness.resizes(),
        vec![CloudCall::ResizeVolume(String::from("vol-0a1"), 32)]
    );
}

#[rstest]
#[case::same_size(8)]
#[case::shrink(4)]
#[tokio::test(start_paused = true)]
async fn target_size_must_grow_the_volume(#[case] requested_gb: u32) {
    let harness = Harness::with_web_instance();
    harness.cloud.add_volume("i-0aaa", "vol-0a1", 8);
    harness.prompt.answer_size(requested_gb);

    let err = harness
        .workflows
        .increase_disk_size(ResizeOptions {
            advanced_mode: true,
            automatic_partition_resize: false,
        })
        .await
        .expect_err("non-growing size should be rejected");

    assert_eq!(
        err,
        WorkflowError::InvalidTargetSize {
            volume_id: String::from("vol-0a1"),
            current_gb: 8,
            requested_gb,
        }
    );
    assert!(harness.resizes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_partition_step_is_collected_and_later_steps_run() {
    let harness = Harness::with_web_instance();
    harness.cloud.add_volume("i-0aaa", "vol-0a1", 8);
    harness.prompt.answer_confirm(true);
    harness.runner.push_stdout("test-ssh\n");
    harness.runner.push_stdout("nvme0n1 259:0 0 16G 0 disk\n");
    harness.runner.push_stdout("/dev/root 7.7G 7.5G 200M 98% /\n");
    harness
        .runner
        .push_output(Some(2), "", "NOCHANGE: partition 1 is size 16775135");
    harness.runner.push_stdout("resized\n");
    harness.runner.push_stdout("/dev/root 16G 7.5G 8.5G 47% /\n");

    let report = completed_resize(
        harness
            .workflows
            .increase_disk_size(ResizeOptions {
                advanced_mode: false,
                automatic_partition_resize: true,
            })
            .await
            .expect("step failures do not abort the workflow"),
    );

    assert!(!report.is_clean());
    assert_eq!(
        report.partition_steps,
        Some(StepReport {
            attempted: 5,
            failed: vec![String::from("sudo growpart /dev/nvme0n1 1")],
        })
    );
    assert_eq!(harness.remote_steps().len(), 5);
    assert!(
        harness
            .console
            .at(ConsoleLevel::Failure)
            .contains(&String::from(
                "sudo growpart /dev/nvme0n1 1: NOCHANGE: partition 1 is size 16775135"
            ))
    );
    assert!(
        harness
            .console
            .at(ConsoleLevel::Warn)
            .iter()
            .any(|line| line.starts_with("increase-disk-size finished with 1 of 5 steps failed"))
    );
}

#[tokio::test(start_paused = true)]
async fn clean_disk_runs_every_step_in_order() {
    let harness = Harness::with_web_instance();
    harness.prompt.answer_confirm(true);
    harness.script_ssh_successes(8);

    let outcome = harness
        .workflows
        .clean_disk()
        .await
        .expect("clean-up should succeed");

    assert_eq!(
        outcome,
        CleanOutcome::Completed(StepReport {
            attempted: 8,
            failed: Vec::new(),
        })
    );
    assert_eq!(
        harness.remote_steps(),
        [
            "df -h",
            "sudo journalctl --vacuum-size=200M",
            "bash -s",
            "sudo apt-get clean",
            "sudo apt-get autoclean",
            "sudo apt-get autoremove -y",
            "sudo apt-get purge snapd -y",
            "df -h",
        ]
    );

    let invocations = harness.runner.invocations();
    let script = invocations
        .get(3)
        .unwrap_or_else(|| panic!("script step missing"));
    assert_eq!(script.input.as_deref(), Some(CLEAN_SNAPS_SCRIPT.as_bytes()));
    let staged = std::fs::read_to_string(harness.root.join("clean-snaps.sh"))
        .unwrap_or_else(|err| panic!("staged script: {err}"));
    assert_eq!(staged, CLEAN_SNAPS_SCRIPT);
    assert_eq!(
        harness.prompt.asked(),
        vec![PromptAsked::Confirm(String::from(
            "This will execute several shell commands to clean up unnecessary files on the \
             instance [i-0aaa - 203.0.113.7]. Continue?"
        ))]
    );
}

#[tokio::test(start_paused = true)]
async fn clean_disk_continues_after_a_failed_step() {
    let harness = Harness::with_web_instance();
    harness.prompt.answer_confirm(true);
    harness.runner.push_stdout("test-ssh\n");
    harness.runner.push_stdout("usage\n");
    harness.runner.push_failure(1);
    for _ in 0..6 {
        harness.runner.push_stdout("ok\n");
    }

    let outcome = harness
        .workflows
        .clean_disk()
        .await
        .expect("step failures do not abort the workflow");

    assert_eq!(
        outcome,
        CleanOutcome::Completed(StepReport {
            attempted: 8,
            failed: vec![String::from("sudo journalctl --vacuum-size=200M")],
        })
    );
    assert_eq!(harness.remote_steps().len(), 8);
}

#[tokio::test(start_paused = true)]
async fn declined_clean_up_runs_nothing_after_the_key_check() {
    let harness = Harness::with_web_instance();
    harness.prompt.answer_confirm(false);
    harness.script_ssh_successes(0);

    let outcome = harness
        .workflows
        .clean_disk()
        .await
        .expect("declining is not an error");

    assert_eq!(outcome, CleanOutcome::Declined);
    assert_eq!(harness.runner.invocations().len(), 1);
}

#[rstest]
#[case::nvme("/dev/nvme0n1", 1, "/dev/nvme0n1p1")]
#[case::xen("/dev/xvda", 1, "/dev/xvda1")]
#[case::loop_device("/dev/loop0", 2, "/dev/loop0p2")]
fn partition_path_follows_device_naming(
    #[case] device: &str,
    #[case] partition: u32,
    #[case] expected: &str,
) {
    assert_eq!(partition_path(device, partition), expected);
}
