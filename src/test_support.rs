//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::net::IpAddr;
use std::rc::Rc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use camino::{Utf8Path, Utf8PathBuf};

use crate::cloud::{
    CloudError, CloudProvider, Instance, InstanceState, PowerState, Profile, Volume,
    VolumeModification,
};
use crate::console::Console;
use crate::exec::{CommandOutput, CommandRunner, ExecError};
use crate::prompt::{Prompt, PromptError, VolumeChoice};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Bytes written to standard input, if any.
    pub input: Option<Vec<u8>>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status with empty output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a successful exit status with the given stdout.
    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }

    fn respond(
        &self,
        program: &str,
        args: &[OsString],
        input: Option<&[u8]>,
    ) -> Result<CommandOutput, ExecError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            input: input.map(<[u8]>::to_vec),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| ExecError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ExecError> {
        self.respond(program, args, None)
    }

    fn run_with_input(
        &self,
        program: &str,
        args: &[OsString],
        input: &[u8],
    ) -> Result<CommandOutput, ExecError> {
        self.respond(program, args, Some(input))
    }
}

/// A provider call recorded by [`FakeCloud`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CloudCall {
    /// `list_instances`.
    ListInstances,
    /// `list_volumes` for an instance.
    ListVolumes(String),
    /// `resize_volume` of a volume to a size.
    ResizeVolume(String, u32),
    /// `request_power_state` of an instance.
    RequestPower(String, PowerState),
    /// `instance_state` of an instance.
    InstanceState(String),
    /// `user_data` of an instance.
    UserData(String),
    /// `set_user_data` of an instance.
    SetUserData(String),
}

impl CloudCall {
    /// `aws ec2` operation the call corresponds to.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::ListInstances | Self::InstanceState(_) => "describe-instances",
            Self::ListVolumes(_) => "describe-volumes",
            Self::ResizeVolume(..) => "modify-volume",
            Self::RequestPower(_, PowerState::Running) => "start-instances",
            Self::RequestPower(_, PowerState::Stopped) => "stop-instances",
            Self::UserData(_) => "describe-instance-attribute",
            Self::SetUserData(_) => "modify-instance-attribute",
        }
    }
}

#[derive(Debug)]
struct FakeCloudState {
    instances: Vec<Instance>,
    volumes: Vec<(String, Volume)>,
    power: PowerState,
    scripted_codes: VecDeque<u16>,
    ip_after_start: Option<IpAddr>,
    user_data: Vec<u8>,
    uploads: Vec<Vec<u8>>,
    calls: Vec<CloudCall>,
    failures: Vec<(CloudCall, usize)>,
}

/// In-memory [`CloudProvider`] with a single power state shared by all
/// instances.
///
/// Power requests take effect immediately unless state codes were scripted
/// with [`FakeCloud::script_state_codes`], in which case queries return
/// those codes first. Uploaded user-data files are decoded from base64 and
/// recorded. Individual calls can be made to fail with
/// [`FakeCloud::fail_call`].
#[derive(Clone, Debug)]
pub struct FakeCloud {
    state: Rc<RefCell<FakeCloudState>>,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self {
            state: Rc::new(RefCell::new(FakeCloudState {
                instances: Vec::new(),
                volumes: Vec::new(),
                power: PowerState::Running,
                scripted_codes: VecDeque::new(),
                ip_after_start: None,
                user_data: Vec::new(),
                uploads: Vec::new(),
                calls: Vec::new(),
                failures: Vec::new(),
            })),
        }
    }
}

impl FakeCloud {
    /// Creates an empty running cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a named instance.
    pub fn add_instance(&self, id: &str, name: &str, public_ip: Option<IpAddr>) {
        self.state.borrow_mut().instances.push(Instance {
            id: id.to_owned(),
            name: name.to_owned(),
            public_ip,
        });
    }

    /// Attaches a volume to an instance.
    pub fn add_volume(&self, instance_id: &str, volume_id: &str, size_gb: u32) {
        self.state.borrow_mut().volumes.push((
            instance_id.to_owned(),
            Volume {
                id: volume_id.to_owned(),
                size_gb,
                volume_type: String::from("gp2"),
            },
        ));
    }

    /// Sets the current power state.
    pub fn set_power(&self, power: PowerState) {
        self.state.borrow_mut().power = power;
    }

    /// Queues state codes returned by the next state queries.
    pub fn script_state_codes(&self, codes: &[u16]) {
        self.state.borrow_mut().scripted_codes.extend(codes);
    }

    /// Makes the `occurrence`-th call equal to `call` (counting from one)
    /// fail with a command failure. The failed call is still recorded and
    /// has no effect.
    pub fn fail_call(&self, call: CloudCall, occurrence: usize) {
        self.state.borrow_mut().failures.push((call, occurrence));
    }

    /// Public address every instance receives when started.
    pub fn set_ip_after_start(&self, ip: IpAddr) {
        self.state.borrow_mut().ip_after_start = Some(ip);
    }

    /// Sets the stored user-data.
    pub fn set_user_data_bytes(&self, bytes: &[u8]) {
        self.state.borrow_mut().user_data = bytes.to_vec();
    }

    /// Current stored user-data.
    #[must_use]
    pub fn user_data_bytes(&self) -> Vec<u8> {
        self.state.borrow().user_data.clone()
    }

    /// Every decoded user-data upload, oldest first.
    #[must_use]
    pub fn uploads(&self) -> Vec<Vec<u8>> {
        self.state.borrow().uploads.clone()
    }

    /// Every provider call, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<CloudCall> {
        self.state.borrow().calls.clone()
    }

    /// Power requests issued, oldest first.
    #[must_use]
    pub fn power_requests(&self) -> Vec<PowerState> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                CloudCall::RequestPower(_, target) => Some(*target),
                _ => None,
            })
            .collect()
    }

    /// Number of state queries made.
    #[must_use]
    pub fn state_queries(&self) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| matches!(call, CloudCall::InstanceState(_)))
            .count()
    }

    fn record(&self, call: CloudCall) -> Result<(), CloudError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(call.clone());
        let occurrence = state.calls.iter().filter(|made| **made == call).count();
        if state.failures.contains(&(call.clone(), occurrence)) {
            return Err(CloudError::CommandFailure {
                program: String::from("fake"),
                operation: call.operation().to_owned(),
                status: Some(254),
                status_text: String::from("254"),
                stderr: String::from("simulated provider failure"),
            });
        }
        Ok(())
    }
}

impl CloudProvider for FakeCloud {
    fn list_instances(&self, _profile: &Profile) -> Result<Vec<Instance>, CloudError> {
        self.record(CloudCall::ListInstances)?;
        Ok(self.state.borrow().instances.clone())
    }

    fn list_volumes(
        &self,
        _profile: &Profile,
        instance_id: &str,
    ) -> Result<Vec<Volume>, CloudError> {
        self.record(CloudCall::ListVolumes(instance_id.to_owned()))?;
        Ok(self
            .state
            .borrow()
            .volumes
            .iter()
            .filter(|(owner, _)| owner == instance_id)
            .map(|(_, volume)| volume.clone())
            .collect())
    }

    fn resize_volume(
        &self,
        _profile: &Profile,
        volume_id: &str,
        size_gb: u32,
    ) -> Result<VolumeModification, CloudError> {
        self.record(CloudCall::ResizeVolume(volume_id.to_owned(), size_gb))?;
        let mut state = self.state.borrow_mut();
        let volume = state
            .volumes
            .iter_mut()
            .map(|(_, volume)| volume)
            .find(|volume| volume.id == volume_id)
            .ok_or_else(|| CloudError::CommandFailure {
                program: String::from("fake"),
                operation: String::from("modify-volume"),
                status: Some(254),
                status_text: String::from("254"),
                stderr: format!("volume {volume_id} does not exist"),
            })?;
        let original_size_gb = volume.size_gb;
        volume.size_gb = size_gb;
        Ok(VolumeModification {
            volume_id: volume_id.to_owned(),
            original_size_gb,
            target_size_gb: size_gb,
        })
    }

    fn request_power_state(
        &self,
        _profile: &Profile,
        instance_id: &str,
        target: PowerState,
    ) -> Result<(), CloudError> {
        self.record(CloudCall::RequestPower(instance_id.to_owned(), target))?;
        let mut state = self.state.borrow_mut();
        state.power = target;
        if target == PowerState::Running
            && let Some(ip) = state.ip_after_start
        {
            for instance in &mut state.instances {
                instance.public_ip = Some(ip);
            }
        }
        Ok(())
    }

    fn instance_state(
        &self,
        _profile: &Profile,
        instance_id: &str,
    ) -> Result<InstanceState, CloudError> {
        self.record(CloudCall::InstanceState(instance_id.to_owned()))?;
        let mut state = self.state.borrow_mut();
        let public_ip = state
            .instances
            .iter()
            .find(|instance| instance.id == instance_id)
            .ok_or_else(|| CloudError::InstanceNotFound {
                instance_id: instance_id.to_owned(),
            })?
            .public_ip;
        let steady = state.power.code();
        let code = state.scripted_codes.pop_front().unwrap_or(steady);
        Ok(InstanceState { code, public_ip })
    }

    fn user_data(&self, _profile: &Profile, instance_id: &str) -> Result<Vec<u8>, CloudError> {
        self.record(CloudCall::UserData(instance_id.to_owned()))?;
        Ok(self.state.borrow().user_data.clone())
    }

    fn set_user_data(
        &self,
        _profile: &Profile,
        instance_id: &str,
        encoded_payload: &Utf8Path,
    ) -> Result<(), CloudError> {
        self.record(CloudCall::SetUserData(instance_id.to_owned()))?;
        let decode_error = |message: String| CloudError::Decode {
            what: String::from("user-data payload"),
            instance_id: instance_id.to_owned(),
            message,
        };
        let encoded = std::fs::read_to_string(encoded_payload)
            .map_err(|err| decode_error(err.to_string()))?;
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|err| decode_error(err.to_string()))?;
        let mut state = self.state.borrow_mut();
        state.user_data.clone_from(&decoded);
        state.uploads.push(decoded);
        Ok(())
    }
}

/// A question asked through [`ScriptedPrompt`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PromptAsked {
    /// Instance selection.
    Instance,
    /// Volume selection with the offered volume ids and whether Quit was
    /// offered.
    Volume(Vec<String>, bool),
    /// Target size question.
    TargetSize,
    /// Key path question.
    KeyPath,
    /// Confirmation with its message.
    Confirm(String),
}

#[derive(Debug, Default)]
struct PromptScript {
    instance_choices: VecDeque<usize>,
    volume_choices: VecDeque<Option<usize>>,
    sizes: VecDeque<u32>,
    key_paths: VecDeque<Option<Utf8PathBuf>>,
    confirms: VecDeque<bool>,
    asked: Vec<PromptAsked>,
}

/// [`Prompt`] answering from queued replies.
///
/// An unscripted question fails with [`PromptError::Cancelled`].
#[derive(Clone, Debug, Default)]
pub struct ScriptedPrompt {
    script: Rc<RefCell<PromptScript>>,
}

impl ScriptedPrompt {
    /// Creates a prompt with no queued answers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the index of the instance to pick.
    pub fn choose_instance(&self, index: usize) {
        self.script.borrow_mut().instance_choices.push_back(index);
    }

    /// Queues the index of the volume to pick.
    pub fn choose_volume(&self, index: usize) {
        self.script.borrow_mut().volume_choices.push_back(Some(index));
    }

    /// Queues a Quit answer to a volume selection.
    pub fn choose_quit(&self) {
        self.script.borrow_mut().volume_choices.push_back(None);
    }

    /// Queues a target size answer.
    pub fn answer_size(&self, size_gb: u32) {
        self.script.borrow_mut().sizes.push_back(size_gb);
    }

    /// Queues a key path answer; `None` asks for a new key.
    pub fn answer_key_path(&self, path: Option<Utf8PathBuf>) {
        self.script.borrow_mut().key_paths.push_back(path);
    }

    /// Queues a confirmation answer.
    pub fn answer_confirm(&self, answer: bool) {
        self.script.borrow_mut().confirms.push_back(answer);
    }

    /// Questions asked so far.
    #[must_use]
    pub fn asked(&self) -> Vec<PromptAsked> {
        self.script.borrow().asked.clone()
    }
}

impl Prompt for ScriptedPrompt {
    fn select_instance(&self, instances: &[Instance]) -> Result<Instance, PromptError> {
        let mut script = self.script.borrow_mut();
        script.asked.push(PromptAsked::Instance);
        let index = script
            .instance_choices
            .pop_front()
            .ok_or(PromptError::Cancelled)?;
        instances
            .get(index)
            .cloned()
            .ok_or_else(|| PromptError::Failed(format!("no instance at index {index}")))
    }

    fn select_volume(
        &self,
        _message: &str,
        volumes: &[Volume],
        allow_quit: bool,
    ) -> Result<VolumeChoice, PromptError> {
        let mut script = self.script.borrow_mut();
        script.asked.push(PromptAsked::Volume(
            volumes.iter().map(|volume| volume.id.clone()).collect(),
            allow_quit,
        ));
        match script
            .volume_choices
            .pop_front()
            .ok_or(PromptError::Cancelled)?
        {
            None if allow_quit => Ok(VolumeChoice::Quit),
            None => Err(PromptError::Failed(String::from("quit was not offered"))),
            Some(index) => volumes
                .get(index)
                .cloned()
                .map(VolumeChoice::Volume)
                .ok_or_else(|| PromptError::Failed(format!("no volume at index {index}"))),
        }
    }

    fn target_size_gb(&self, _current_gb: u32, _suggested_gb: u32) -> Result<u32, PromptError> {
        let mut script = self.script.borrow_mut();
        script.asked.push(PromptAsked::TargetSize);
        script.sizes.pop_front().ok_or(PromptError::Cancelled)
    }

    fn key_path(&self) -> Result<Option<Utf8PathBuf>, PromptError> {
        let mut script = self.script.borrow_mut();
        script.asked.push(PromptAsked::KeyPath);
        script.key_paths.pop_front().ok_or(PromptError::Cancelled)
    }

    fn confirm(&self, message: &str) -> Result<bool, PromptError> {
        let mut script = self.script.borrow_mut();
        script.asked.push(PromptAsked::Confirm(message.to_owned()));
        script.confirms.pop_front().ok_or(PromptError::Cancelled)
    }
}

/// Severity of a message captured by [`RecordingConsole`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConsoleLevel {
    /// [`Console::status`].
    Status,
    /// [`Console::success`].
    Success,
    /// [`Console::warn`].
    Warn,
    /// [`Console::failure`].
    Failure,
}

/// [`Console`] that keeps every message for assertions.
#[derive(Clone, Debug, Default)]
pub struct RecordingConsole {
    lines: Rc<RefCell<Vec<(ConsoleLevel, String)>>>,
}

impl RecordingConsole {
    /// Creates an empty console.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message recorded so far.
    #[must_use]
    pub fn lines(&self) -> Vec<(ConsoleLevel, String)> {
        self.lines.borrow().clone()
    }

    /// Messages recorded at `level`.
    #[must_use]
    pub fn at(&self, level: ConsoleLevel) -> Vec<String> {
        self.lines
            .borrow()
            .iter()
            .filter(|(recorded, _)| *recorded == level)
            .map(|(_, line)| line.clone())
            .collect()
    }

    fn push(&self, level: ConsoleLevel, message: &str) {
        self.lines.borrow_mut().push((level, message.to_owned()));
    }
}

impl Console for RecordingConsole {
    fn status(&self, message: &str) {
        self.push(ConsoleLevel::Status, message);
    }

    fn success(&self, message: &str) {
        self.push(ConsoleLevel::Success, message);
    }

    fn warn(&self, message: &str) {
        self.push(ConsoleLevel::Warn, message);
    }

    fn failure(&self, message: &str) {
        self.push(ConsoleLevel::Failure, message);
    }
}
