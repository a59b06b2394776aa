//! Operator workflows composed from the cloud, bootstrap and remote layers.
//!
//! [`Workflows`] owns one wired set of collaborators and exposes the two
//! end-to-end operations: growing a root volume and freeing disk space.
//! Remote steps inside a workflow never abort it; each failure is reported
//! as it happens and collected into a [`StepReport`].

use std::net::IpAddr;

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::info;

use crate::bootstrap::{
    BootstrapError, BootstrapOutcome, BootstrapSettings, KeyGenerator, SshBootstrap,
};
use crate::cloud::{AwsCli, CloudError, CloudProvider, Instance, InstanceDirectory, Profile};
use crate::config::{ConfigError, ToolConfig};
use crate::console::Console;
use crate::exec::CommandRunner;
use crate::prompt::{Prompt, PromptError};
use crate::remote::{Emphasis, RemoteCommand, RemoteRunner};

mod clean;
mod resize;

pub use clean::{CLEAN_SNAPS_SCRIPT, CleanOutcome};
pub use resize::{ResizeOptions, ResizeOutcome, ResizeReport, partition_path};

/// Volume sizes and root partition layout targeted by the resize workflow.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiskLayout {
    /// Size, in gigabytes, of volumes that still need growing.
    pub original_size_gb: u32,
    /// Size, in gigabytes, they are grown to.
    pub requested_size_gb: u32,
    /// Root block device on the instance.
    pub root_device: String,
    /// Partition number of the root filesystem.
    pub root_partition: u32,
}

/// Errors that stop a workflow.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum WorkflowError {
    /// Nothing suitable to operate on was found.
    #[error("{0}")]
    NoUsableResource(String),
    /// The operator asked for a size that would not grow the volume.
    #[error(
        "cannot resize volume {volume_id} from {current_gb}GB to {requested_gb}GB: \
         the new size must be larger"
    )]
    InvalidTargetSize {
        /// Volume being resized.
        volume_id: String,
        /// Current size.
        current_gb: u32,
        /// Requested size.
        requested_gb: u32,
    },
    /// Remote steps need an address the instance does not have.
    #[error("instance {instance_id} has no public address")]
    MissingPublicIp {
        /// Instance without an address.
        instance_id: String,
    },
    /// A bundled script could not be written to the work directory.
    #[error("failed to stage {path}: {message}")]
    Script {
        /// Destination path.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// A cloud call failed.
    #[error(transparent)]
    Cloud(#[from] CloudError),
    /// SSH access could not be established.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// The operator could not be asked.
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// Remote steps attempted by a workflow and those that failed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StepReport {
    /// Number of steps run.
    pub attempted: usize,
    /// Labels of the steps that failed, in order.
    pub failed: Vec<String>,
}

impl StepReport {
    /// Returns true when every step succeeded.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One remote step with an optional heading shown before it runs.
#[derive(Clone, Debug)]
pub(crate) struct Step {
    heading: Option<&'static str>,
    command: RemoteCommand,
    emphasis: Emphasis,
}

impl Step {
    pub(crate) fn info(command: impl Into<String>) -> Self {
        Self {
            heading: None,
            command: RemoteCommand::inline(command),
            emphasis: Emphasis::Info,
        }
    }

    pub(crate) const fn action(command: RemoteCommand) -> Self {
        Self {
            heading: None,
            command,
            emphasis: Emphasis::Action,
        }
    }

    pub(crate) const fn headed(mut self, heading: &'static str) -> Self {
        self.heading = Some(heading);
        self
    }
}

/// Wired collaborators for running workflows.
pub struct Workflows<P, R: CommandRunner, Q, C> {
    directory: InstanceDirectory<P>,
    remote: RemoteRunner<R>,
    keygen: KeyGenerator<R>,
    prompt: Q,
    console: C,
    bootstrap: BootstrapSettings,
    layout: DiskLayout,
}

impl<R, Q, C> Workflows<AwsCli<R>, R, Q, C>
where
    R: CommandRunner + Clone,
    Q: Prompt,
    C: Console,
{
    /// Wires the `aws`, `ssh` and `ssh-keygen` tooling from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration is invalid.
    pub fn from_config(
        config: &ToolConfig,
        profile: Profile,
        runner: R,
        prompt: Q,
        console: C,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let bootstrap = config.bootstrap_settings()?;
        Ok(Self::new(
            InstanceDirectory::new(
                AwsCli::new(config.aws_bin.clone(), runner.clone()),
                profile,
                config.power_policy()?,
            ),
            RemoteRunner::new(config.ssh_settings(), runner.clone()),
            KeyGenerator::new(bootstrap.ssh_keygen_bin.clone(), runner),
            prompt,
            console,
            bootstrap,
            config.disk_layout(),
        ))
    }
}

impl<P, R, Q, C> Workflows<P, R, Q, C>
where
    P: CloudProvider,
    R: CommandRunner,
    Q: Prompt,
    C: Console,
{
    /// Assembles workflows from individual collaborators.
    #[must_use]
    pub const fn new(
        directory: InstanceDirectory<P>,
        remote: RemoteRunner<R>,
        keygen: KeyGenerator<R>,
        prompt: Q,
        console: C,
        bootstrap: BootstrapSettings,
        layout: DiskLayout,
    ) -> Self {
        Self {
            directory,
            remote,
            keygen,
            prompt,
            console,
            bootstrap,
            layout,
        }
    }

    /// Lists named instances and picks one, asking when there is a choice.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::NoUsableResource`] when no named instance
    /// exists, or any provider or prompt failure.
    pub fn select_instance(&self) -> Result<Instance, WorkflowError> {
        let instances = self.directory.list_instances()?;
        info!(
            profile = %self.directory.profile(),
            count = instances.len(),
            "instances listed"
        );

        let instance = match instances.as_slice() {
            [] => {
                return Err(WorkflowError::NoUsableResource(String::from(
                    "No instances found! cannot continue",
                )));
            }
            [only] => only.clone(),
            _ => {
                self.console.warn(
                    "More than one instance found, please select an instance \
                     (hint: choose the account with --profile)",
                );
                self.prompt.select_instance(&instances)?
            }
        };

        info!(instance_id = %instance.id, name = %instance.name, "instance selected");
        self.console.status(&format!("working on instance [{instance}]"));
        Ok(instance)
    }

    async fn establish_access(
        &self,
        instance: Instance,
    ) -> Result<BootstrapOutcome, WorkflowError> {
        let bootstrap = SshBootstrap::new(
            &self.directory,
            &self.remote,
            &self.keygen,
            &self.console,
            &self.bootstrap,
        );
        Ok(bootstrap.establish(instance, &self.prompt).await?)
    }

    fn run_steps(
        &self,
        access: &BootstrapOutcome,
        steps: &[Step],
    ) -> Result<StepReport, WorkflowError> {
        let host = public_ip(&access.instance)?;
        let mut report = StepReport::default();
        for step in steps {
            if let Some(heading) = step.heading {
                self.console.status(heading);
            }
            let result = self.remote.execute(
                &self.console,
                &access.key_path,
                host,
                &step.command,
                step.emphasis,
            );
            report.attempted += 1;
            if !result.is_success() {
                report.failed.push(step.command.label());
            }
        }
        Ok(report)
    }

    fn summarise(&self, workflow: &str, report: &StepReport) {
        if report.is_clean() {
            self.console.success(&format!("{workflow} -> Done!"));
        } else {
            self.console.warn(&format!(
                "{workflow} finished with {} of {} steps failed: {}",
                report.failed.len(),
                report.attempted,
                report.failed.join(", ")
            ));
        }
    }
}

fn public_ip(instance: &Instance) -> Result<IpAddr, WorkflowError> {
    instance
        .public_ip
        .ok_or_else(|| WorkflowError::MissingPublicIp {
            instance_id: instance.id.clone(),
        })
}

#[cfg(test)]
mod tests;
