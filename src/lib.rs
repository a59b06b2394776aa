//! Core library for the `diskops` EC2 disk maintenance tool.
//!
//! The crate lists instances and volumes through the `aws` CLI, grows root
//! volumes, runs clean-up commands over `ssh`, and recovers SSH access to
//! instances whose key has been lost by injecting a fresh key through
//! cloud-init user-data.

pub mod bootstrap;
pub mod cloud;
pub mod config;
pub mod console;
pub mod exec;
mod local_fs;
pub mod prompt;
pub mod remote;
pub mod retry;
pub mod test_support;
pub mod workflow;

pub use bootstrap::{BootstrapError, BootstrapSettings, KeyGenerator, SshBootstrap};
pub use cloud::{AwsCli, CloudError, CloudProvider, Instance, InstanceDirectory, Profile, Volume};
pub use config::{ConfigError, ToolConfig};
pub use console::{Console, TerminalConsole};
pub use exec::{CommandOutput, CommandRunner, ExecError, ProcessCommandRunner};
pub use local_fs::expand_tilde;
pub use prompt::{InquirePrompt, Prompt, PromptError};
pub use remote::{RemoteCommand, RemoteRunner, SshSettings};
pub use retry::{RetryError, RetryPolicy, retry};
pub use workflow::{
    CleanOutcome, DiskLayout, ResizeOptions, ResizeOutcome, ResizeReport, StepReport,
    WorkflowError, Workflows,
};
