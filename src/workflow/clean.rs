//! Disk clean-up: journal vacuuming, snap revisions and apt caches.

use camino::Utf8PathBuf;
use tracing::info;

use crate::cloud::CloudProvider;
use crate::console::Console;
use crate::exec::CommandRunner;
use crate::local_fs;
use crate::prompt::Prompt;
use crate::remote::RemoteCommand;

use super::{Step, StepReport, WorkflowError, Workflows};

/// Script that removes disabled snap revisions, streamed to the instance.
pub const CLEAN_SNAPS_SCRIPT: &str = include_str!("../../scripts/clean-snaps.sh");

const CLEAN_SNAPS_FILE: &str = "clean-snaps.sh";

/// Result of [`Workflows::clean_disk`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CleanOutcome {
    /// The operator declined the confirmation.
    Declined,
    /// The clean-up ran; failed steps are listed in the report.
    Completed(StepReport),
}

impl<P, R, Q, C> Workflows<P, R, Q, C>
where
    P: CloudProvider,
    R: CommandRunner,
    Q: Prompt,
    C: Console,
{
    /// Frees disk space on the selected instance.
    ///
    /// Every step runs even when an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] when no instance is available, SSH access
    /// cannot be established, the operator cannot be asked or the bundled
    /// script cannot be staged.
    pub async fn clean_disk(&self) -> Result<CleanOutcome, WorkflowError> {
        info!(profile = %self.directory.profile(), "clean-disk started");
        let instance = self.select_instance()?;
        let access = self.establish_access(instance).await?;

        let address = access
            .instance
            .public_ip
            .map_or_else(|| String::from("no public address"), |ip| ip.to_string());
        let question = format!(
            "This will execute several shell commands to clean up unnecessary files on the \
             instance [{} - {address}]. Continue?",
            access.instance.id
        );
        if !self.prompt.confirm(&question)? {
            info!(instance_id = %access.instance.id, "clean-up declined");
            return Ok(CleanOutcome::Declined);
        }

        let script = self.stage_clean_snaps()?;
        let steps = [
            Step::info("df -h"),
            Step::action(RemoteCommand::inline("sudo journalctl --vacuum-size=200M")),
            Step::action(RemoteCommand::Script(script)),
            Step::action(RemoteCommand::inline("sudo apt-get clean")),
            Step::action(RemoteCommand::inline("sudo apt-get autoclean")),
            Step::action(RemoteCommand::inline("sudo apt-get autoremove -y")),
            Step::action(RemoteCommand::inline("sudo apt-get purge snapd -y")),
            Step::info("df -h"),
        ];
        let report = self.run_steps(&access, &steps)?;
        self.summarise("clean-disk", &report);
        Ok(CleanOutcome::Completed(report))
    }

    fn stage_clean_snaps(&self) -> Result<Utf8PathBuf, WorkflowError> {
        let path = self.bootstrap.work_dir.join(CLEAN_SNAPS_FILE);
        local_fs::write_bytes(&path, CLEAN_SNAPS_SCRIPT.as_bytes())
            .map_err(|message| WorkflowError::Script {
                path: path.clone(),
                message,
            })?;
        Ok(path)
    }
}
