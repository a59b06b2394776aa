//! Root volume growth: provider resize followed by partition growth.

use std::borrow::Cow;

use shell_escape::unix::escape;
use tracing::info;

use crate::cloud::{CloudProvider, Instance, Volume, VolumeModification};
use crate::console::Console;
use crate::exec::CommandRunner;
use crate::prompt::{Prompt, VolumeChoice};
use crate::remote::RemoteCommand;

use super::{Step, StepReport, WorkflowError, Workflows};

/// Switches accepted by [`Workflows::increase_disk_size`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ResizeOptions {
    /// Ask for volumes and sizes instead of choosing them automatically.
    pub advanced_mode: bool,
    /// Grow the partition and file system over SSH after the resize.
    pub automatic_partition_resize: bool,
}

/// What a completed resize changed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResizeReport {
    /// Instance the volume is attached to, with its current address.
    pub instance: Instance,
    /// Volume that was grown.
    pub volume: Volume,
    /// Provider modification; `None` when the volume was already grown.
    pub modification: Option<VolumeModification>,
    /// Partition growth steps, when they ran.
    pub partition_steps: Option<StepReport>,
}

impl ResizeReport {
    /// Returns true when no remote step failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.partition_steps
            .as_ref()
            .is_none_or(StepReport::is_clean)
    }
}

/// Result of [`Workflows::increase_disk_size`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResizeOutcome {
    /// The operator declined the confirmation.
    Declined,
    /// The operator chose Quit at the volume prompt.
    Quit,
    /// The resize ran.
    Completed(ResizeReport),
}

enum VolumePlan {
    Resize(Volume),
    GrowOnly(Volume),
    Quit,
}

/// Partition device for `partition` on `device`.
///
/// Devices whose name ends in a digit, such as NVMe namespaces, separate the
/// partition number with `p`.
#[must_use]
pub fn partition_path(device: &str, partition: u32) -> String {
    if device.ends_with(|ch: char| ch.is_ascii_digit()) {
        format!("{device}p{partition}")
    } else {
        format!("{device}{partition}")
    }
}

impl<P, R, Q, C> Workflows<P, R, Q, C>
where
    P: CloudProvider,
    R: CommandRunner,
    Q: Prompt,
    C: Console,
{
    /// Grows a baseline-sized volume of the selected instance and, when
    /// asked, its root partition and file system.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] when nothing can be resized, a provider call
    /// fails, SSH access cannot be established or the operator cannot be
    /// asked. Failed remote steps are collected in the report instead.
    pub async fn increase_disk_size(
        &self,
        options: ResizeOptions,
    ) -> Result<ResizeOutcome, WorkflowError> {
        info!(profile = %self.directory.profile(), ?options, "increase-disk-size started");
        let mut instance = self.select_instance()?;

        let (volume, provider_resize) = match self.plan_volume(&instance, options)? {
            VolumePlan::Resize(volume) => (volume, true),
            VolumePlan::GrowOnly(volume) => (volume, false),
            VolumePlan::Quit => return Ok(ResizeOutcome::Quit),
        };
        info!(instance_id = %instance.id, volume_id = %volume.id, "volume selected");

        let ssh_access = if options.automatic_partition_resize {
            let granted = self.establish_access(instance).await?;
            instance = granted.instance.clone();
            Some(granted)
        } else {
            None
        };

        let target_gb = if provider_resize {
            self.target_size(&volume, options)?
        } else {
            volume.size_gb
        };

        let address = instance
            .public_ip
            .map_or_else(|| String::from("no public address"), |ip| ip.to_string());
        let question = if provider_resize {
            format!(
                "This will change Volume [{}] on instance [{} - {address}] from size [{}GB] \
                 to size [{target_gb}GB]. Continue?",
                volume.id, instance.id, volume.size_gb
            )
        } else {
            format!(
                "This will attempt automatic resize of partition and file system of [{}] \
                 on instance [{} - {address}]. Continue?",
                volume.id, instance.id
            )
        };
        if !self.prompt.confirm(&question)? {
            info!(instance_id = %instance.id, "resize declined");
            return Ok(ResizeOutcome::Declined);
        }

        let modification = if provider_resize {
            Some(self.resize_volume(&volume, target_gb)?)
        } else {
            None
        };

        let partition_steps = match ssh_access {
            Some(access) => {
                let report = self.run_steps(&access, &self.partition_steps())?;
                self.summarise("increase-disk-size", &report);
                if report.is_clean() {
                    self.console
                        .status("please confirm partitions and mounting sizes");
                }
                Some(report)
            }
            None => {
                self.console.status(
                    "partition resize was not requested; grow the partition and file system \
                     on the instance to use the new space",
                );
                None
            }
        };

        Ok(ResizeOutcome::Completed(ResizeReport {
            instance,
            volume,
            modification,
            partition_steps,
        }))
    }

    fn plan_volume(
        &self,
        instance: &Instance,
        options: ResizeOptions,
    ) -> Result<VolumePlan, WorkflowError> {
        let volumes = self.directory.list_volumes(&instance.id)?;
        if volumes.is_empty() {
            return Err(WorkflowError::NoUsableResource(String::from(
                "No volumes found! cannot continue",
            )));
        }
        info!(instance_id = %instance.id, count = volumes.len(), "volumes listed");

        let layout = &self.layout;
        let baseline: Vec<Volume> = volumes
            .iter()
            .filter(|volume| volume.size_gb == layout.original_size_gb)
            .cloned()
            .collect();

        match baseline.as_slice() {
            [] => self.plan_grow_only(&volumes, options),
            [only] => Ok(VolumePlan::Resize(only.clone())),
            _ => {
                self.console.warn(&format!(
                    "More than one volume with size {}GB was found, please select the desired one",
                    layout.original_size_gb
                ));
                match self
                    .prompt
                    .select_volume("Select Volume to modify", &baseline, false)?
                {
                    VolumeChoice::Volume(volume) => Ok(VolumePlan::Resize(volume)),
                    VolumeChoice::Quit => Ok(VolumePlan::Quit),
                }
            }
        }
    }

    fn plan_grow_only(
        &self,
        volumes: &[Volume],
        options: ResizeOptions,
    ) -> Result<VolumePlan, WorkflowError> {
        let layout = &self.layout;
        let grown = volumes
            .iter()
            .find(|volume| volume.size_gb == layout.requested_size_gb);
        let Some(first_grown) = grown.filter(|_| options.automatic_partition_resize) else {
            return Err(WorkflowError::NoUsableResource(format!(
                "Nothing to do: no {}GB volumes were found",
                layout.original_size_gb
            )));
        };

        self.console.warn(&format!(
            "No volumes with size {}GB were found!",
            layout.original_size_gb
        ));
        if !options.advanced_mode {
            self.console.status(&format!(
                "Auto selecting a volume with {}GB size (assuming the tool has already been \
                 executed before)",
                layout.requested_size_gb
            ));
            return Ok(VolumePlan::GrowOnly(first_grown.clone()));
        }

        let choice = self.prompt.select_volume(
            "Select a volume manually to try to automatic resize of partition and file \
             system? (this is useful if the size was already modified earlier)",
            volumes,
            true,
        )?;
        Ok(match choice {
            VolumeChoice::Volume(volume) => VolumePlan::GrowOnly(volume),
            VolumeChoice::Quit => VolumePlan::Quit,
        })
    }

    fn target_size(&self, volume: &Volume, options: ResizeOptions) -> Result<u32, WorkflowError> {
        let suggested = self.layout.requested_size_gb;
        if !options.advanced_mode {
            return Ok(suggested);
        }
        let requested = self.prompt.target_size_gb(volume.size_gb, suggested)?;
        if requested <= volume.size_gb {
            return Err(WorkflowError::InvalidTargetSize {
                volume_id: volume.id.clone(),
                current_gb: volume.size_gb,
                requested_gb: requested,
            });
        }
        Ok(requested)
    }

    fn resize_volume(
        &self,
        volume: &Volume,
        target_gb: u32,
    ) -> Result<VolumeModification, WorkflowError> {
        info!(volume_id = %volume.id, target_gb, "executing volume size change");
        let modification = self.directory.resize_volume(&volume.id, target_gb)?;
        info!(
            volume_id = %modification.volume_id,
            original_gb = modification.original_size_gb,
            target_gb = modification.target_size_gb,
            "volume size change accepted"
        );
        self.console.success(&format!(
            "Successfully changed the size of volume [{}] from {}GB to {}GB!",
            modification.volume_id, modification.original_size_gb, modification.target_size_gb
        ));
        Ok(modification)
    }

    fn partition_steps(&self) -> Vec<Step> {
        let layout = &self.layout;
        let device = escape(layout.root_device.as_str().into());
        let partition = escape(Cow::Owned(partition_path(
            &layout.root_device,
            layout.root_partition,
        )));
        vec![
            Step::info("lsblk").headed("current volumes mounted on the instance:"),
            Step::info("df -h")
                .headed("Attempting automatic resize of partition and file system"),
            Step::action(RemoteCommand::inline(format!(
                "sudo growpart {device} {}",
                layout.root_partition
            ))),
            Step::action(RemoteCommand::inline(format!("sudo resize2fs {partition}"))),
            Step::info("df -h"),
        ]
    }
}
