//! SSH access bootstrap for instances whose key is missing or rejected.
//!
//! The protocol first looks for a usable local key and tests it. When the
//! instance rejects the key it stops the instance, snapshots its user-data,
//! generates a tool-managed key pair, uploads a cloud-config document that
//! authorises the new public key and starts the instance again. Once the new
//! key is accepted the original user-data is uploaded back and the instance
//! restarted; the key itself stays authorised.
//!
//! Once the instance has been stopped the protocol runs to completion or to
//! an explicit error that names the failed [`Stage`]. If the new key is never
//! accepted the user-data is deliberately not restored: the instance is left
//! running with the temporary payload and [`BootstrapError::BootstrapFailed`]
//! points at the snapshot for manual recovery.

use std::cell::Cell;
use std::net::IpAddr;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{error, info, warn};

use crate::cloud::{CloudError, CloudProvider, Instance, InstanceDirectory};
use crate::console::Console;
use crate::exec::CommandRunner;
use crate::prompt::Prompt;
use crate::remote::{RemoteCommand, RemoteOutcome, RemoteRunner, TransportFailure};
use crate::retry::{RetryError, RetryPolicy, retry};

mod error;
mod keys;
mod user_data;

pub use error::{BootstrapError, Stage};
pub use keys::{KeyGenerator, KeyPaths, public_key_path};
pub use user_data::{
    ENCODED_SUFFIX, INJECTED_PAYLOAD_FILE, ORIGINAL_SNAPSHOT_FILE, SnapshotStore,
    authorized_key_document,
};

const CHECK_COMMAND: &str = "echo test-ssh";

/// Settings for one bootstrap run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootstrapSettings {
    /// Candidate private keys.
    pub keys: KeyPaths,
    /// Directory for user-data snapshots and staged payloads.
    pub work_dir: Utf8PathBuf,
    /// Login user whose authorised keys receive the new key.
    pub login_user: String,
    /// Path to the `ssh-keygen` executable.
    pub ssh_keygen_bin: String,
    /// Budget for the new key to be accepted.
    pub ssh_policy: RetryPolicy,
    /// Times an unreachable instance is started before giving up.
    pub wake_attempts: u32,
}

/// What to do when the instance rejects the offered key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OnRejected {
    /// Run the full key regeneration protocol.
    Regenerate,
    /// Report the rejection without side effects.
    Report,
}

/// A key known to work against an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootstrapOutcome {
    /// Private key to use for remote commands.
    pub key_path: Utf8PathBuf,
    /// The instance with its current public address.
    pub instance: Instance,
}

/// Result of testing a key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SshAccess {
    /// The key works.
    Granted(BootstrapOutcome),
    /// The key was rejected and the caller asked for no regeneration.
    Rejected,
}

/// Verdict of one round of connection attempts with a key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum KeyCheck {
    Accepted,
    Rejected,
    /// The host never answered, even after `wakes` start attempts.
    Unreachable { wakes: u32 },
}

/// Instance being bootstrapped; its address changes across restarts.
struct Target {
    id: String,
    name: String,
    host: Cell<Option<IpAddr>>,
}

impl Target {
    fn new(instance: Instance) -> Self {
        Self {
            id: instance.id,
            name: instance.name,
            host: Cell::new(instance.public_ip),
        }
    }

    fn refresh(&self, public_ip: Option<IpAddr>) {
        if public_ip.is_some() {
            self.host.set(public_ip);
        }
    }

    fn host_label(&self) -> String {
        self.host
            .get()
            .map_or_else(|| String::from("no public address"), |ip| ip.to_string())
    }

    fn unreachable(&self, wakes: u32) -> BootstrapError {
        BootstrapError::HostUnreachable {
            instance_id: self.id.clone(),
            host: self.host_label(),
            attempts: wakes,
        }
    }

    fn into_outcome(self, key_path: Utf8PathBuf) -> BootstrapOutcome {
        BootstrapOutcome {
            key_path,
            instance: Instance {
                id: self.id,
                name: self.name,
                public_ip: self.host.get(),
            },
        }
    }
}

/// Drives the bootstrap protocol against one provider.
pub struct SshBootstrap<'a, P, R: CommandRunner, C> {
    directory: &'a InstanceDirectory<P>,
    remote: &'a RemoteRunner<R>,
    keygen: &'a KeyGenerator<R>,
    console: &'a C,
    settings: &'a BootstrapSettings,
    snapshots: SnapshotStore,
}

impl<'a, P, R, C> SshBootstrap<'a, P, R, C>
where
    P: CloudProvider,
    R: CommandRunner,
    C: Console,
{
    /// Wires the collaborators for a bootstrap run.
    #[must_use]
    pub fn new(
        directory: &'a InstanceDirectory<P>,
        remote: &'a RemoteRunner<R>,
        keygen: &'a KeyGenerator<R>,
        console: &'a C,
        settings: &'a BootstrapSettings,
    ) -> Self {
        Self {
            directory,
            remote,
            keygen,
            console,
            settings,
            snapshots: SnapshotStore::new(settings.work_dir.clone()),
        }
    }

    /// Returns a key that works against `instance`, regenerating one when
    /// necessary.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] when no working key can be established.
    pub async fn establish(
        &self,
        instance: Instance,
        prompt: &impl Prompt,
    ) -> Result<BootstrapOutcome, BootstrapError> {
        info!(
            stage = %Stage::ProbeExistingKey,
            instance_id = %instance.id,
            "establishing ssh access"
        );
        let candidate = self.probe_existing_key(prompt)?;
        let target = Target::new(instance);
        let key_path = match candidate {
            Some(key) => self.connect_or_regenerate(&target, &key).await?,
            None => self.regenerate(&target).await?,
        };
        Ok(target.into_outcome(key_path))
    }

    /// Picks the tool-managed key, then the default key, then asks the
    /// operator. `None` means a new key must be generated.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Prompt`] when the operator cannot be asked.
    pub fn probe_existing_key(
        &self,
        prompt: &impl Prompt,
    ) -> Result<Option<Utf8PathBuf>, BootstrapError> {
        let keys = &self.settings.keys;
        if let Some(existing) = keys.existing() {
            info!(path = %existing, "using existing ssh key");
            return Ok(Some(existing.to_owned()));
        }

        self.console.warn(&format!(
            "SSH key not found at {} or {}; please provide the path to the SSH key file",
            keys.managed, keys.fallback
        ));
        Ok(prompt.key_path()?)
    }

    /// Tests `key` against `instance`, starting the instance when it does
    /// not answer.
    ///
    /// [`SshAccess::Rejected`] is only returned with [`OnRejected::Report`];
    /// with [`OnRejected::Regenerate`] a rejected key leads to a new one.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] when the instance cannot be woken or, with
    /// [`OnRejected::Regenerate`], when regeneration fails.
    pub async fn try_ssh(
        &self,
        instance: Instance,
        key: &Utf8Path,
        on_rejected: OnRejected,
    ) -> Result<SshAccess, BootstrapError> {
        let target = Target::new(instance);
        let key_path = match on_rejected {
            OnRejected::Regenerate => self.connect_or_regenerate(&target, key).await?,
            OnRejected::Report => match self.check_key(&target, key).await? {
                KeyCheck::Accepted => key.to_owned(),
                KeyCheck::Rejected => return Ok(SshAccess::Rejected),
                KeyCheck::Unreachable { wakes } => return Err(target.unreachable(wakes)),
            },
        };
        Ok(SshAccess::Granted(target.into_outcome(key_path)))
    }

    async fn connect_or_regenerate(
        &self,
        target: &Target,
        key: &Utf8Path,
    ) -> Result<Utf8PathBuf, BootstrapError> {
        match self.check_key(target, key).await? {
            KeyCheck::Accepted => Ok(key.to_owned()),
            KeyCheck::Rejected => {
                self.console.failure(&format!(
                    "failed to ssh connect to instance [{}]",
                    target.name
                ));
                self.regenerate(target).await
            }
            KeyCheck::Unreachable { wakes } => Err(target.unreachable(wakes)),
        }
    }

    /// Connects with `key`, starting the instance up to `wake_attempts`
    /// times while it does not answer. Only cloud failures are errors.
    async fn check_key(
        &self,
        target: &Target,
        key: &Utf8Path,
    ) -> Result<KeyCheck, BootstrapError> {
        let mut wakes = 0;
        loop {
            self.console.status(&format!(
                "attempting to connect to instance [{}] using ssh key in: {key}",
                target.name
            ));
            match self.connect_once(target, key) {
                RemoteOutcome::Success | RemoteOutcome::Failure(TransportFailure::Other) => {
                    self.console.success(&format!(
                        "ssh connect to instance [{}] successful!",
                        target.name
                    ));
                    return Ok(KeyCheck::Accepted);
                }
                RemoteOutcome::Failure(TransportFailure::KeyRejected) => {
                    info!(instance_id = %target.id, path = %key, "ssh key rejected");
                    return Ok(KeyCheck::Rejected);
                }
                RemoteOutcome::Failure(TransportFailure::HostUnreachable) => {}
            }

            if wakes >= self.settings.wake_attempts {
                warn!(
                    instance_id = %target.id,
                    host = %target.host_label(),
                    wakes,
                    "instance did not answer ssh"
                );
                return Ok(KeyCheck::Unreachable { wakes });
            }
            wakes += 1;
            self.console
                .warn("Instance is stopped, attempting to start instance...");
            let state = self
                .directory
                .start_instance(&target.id)
                .await
                .map_err(|source| cloud_error(Stage::TrySsh, target, source))?;
            target.refresh(state.public_ip);
        }
    }

    fn connect_once(&self, target: &Target, key: &Utf8Path) -> RemoteOutcome {
        let Some(host) = target.host.get() else {
            return RemoteOutcome::Failure(TransportFailure::HostUnreachable);
        };
        let result = self
            .remote
            .run(key, host, &RemoteCommand::inline(CHECK_COMMAND));
        let outcome = result.outcome();
        if outcome == RemoteOutcome::Failure(TransportFailure::Other) {
            warn!(
                instance_id = %target.id,
                %host,
                stderr = %result.stderr,
                "ssh check failed for an unrecognised reason; treating key as usable"
            );
        }
        outcome
    }

    async fn regenerate(&self, target: &Target) -> Result<Utf8PathBuf, BootstrapError> {
        let console = self.console;
        console.warn(&format!(
            "attempting to generate a new ssh key and upload it to instance [{}]",
            target.name
        ));

        console.status(&format!("Stopping instance [{}]", target.name));
        self.directory
            .stop_instance(&target.id)
            .await
            .map_err(|source| cloud_error(Stage::StopInstance, target, source))?;

        console.status(&format!(
            "saving current instance [{}] user-data",
            target.name
        ));
        let original = self
            .directory
            .user_data(&target.id)
            .map_err(|source| cloud_error(Stage::SnapshotUserData, target, source))?;
        let snapshot = self.snapshots.capture(&original)?;
        info!(stage = %Stage::SnapshotUserData, path = %snapshot, "user-data saved");

        console.status("generating new ssh key");
        let managed = &self.settings.keys.managed;
        let public_key = self.keygen.generate(managed)?;
        console.success(&format!("new ssh public key is: \n{public_key}"));

        let document = authorized_key_document(&self.settings.login_user, &public_key);
        let payload = self.snapshots.stage_injection(&document)?;
        console.status(&format!(
            "uploading new user-data to instance [{}]",
            target.name
        ));
        self.directory
            .set_user_data(&target.id, &payload)
            .map_err(|source| {
                interrupted(
                    Stage::InjectKey,
                    target,
                    &snapshot,
                    cloud_error(Stage::InjectKey, target, source),
                )
            })?;

        console.status(&format!(
            "starting instance [{}] to import the new ssh key",
            target.name
        ));
        let state = self
            .directory
            .start_instance(&target.id)
            .await
            .map_err(|source| {
                interrupted(
                    Stage::StartInstance,
                    target,
                    &snapshot,
                    cloud_error(Stage::StartInstance, target, source),
                )
            })?;
        target.refresh(state.public_ip);

        self.verify_new_key(target, managed, &snapshot).await?;
        self.restore(target, &snapshot).await?;
        Ok(managed.clone())
    }

    async fn verify_new_key(
        &self,
        target: &Target,
        key: &Utf8Path,
        snapshot: &Utf8Path,
    ) -> Result<(), BootstrapError> {
        let what = format!(
            "ssh to instance {} with the new key (scripts might still be running)",
            target.id
        );
        // Rejections and unanswered wakes both mean cloud-init is not done
        // yet; only a cloud failure while waking ends the loop early.
        let verified = retry(
            &self.settings.ssh_policy,
            &what,
            move || self.check_key(target, key),
            |check: &KeyCheck| *check == KeyCheck::Accepted,
        )
        .await;

        match verified {
            Ok(_) => Ok(()),
            Err(RetryError::Exhausted { attempts, .. }) => {
                let err = BootstrapError::BootstrapFailed {
                    instance_id: target.id.clone(),
                    attempts,
                    snapshot: snapshot.to_owned(),
                };
                error!(
                    stage = %Stage::RetrySsh,
                    instance_id = %target.id,
                    host = %target.host_label(),
                    snapshot = %snapshot,
                    "new ssh key never accepted; user-data left unrestored"
                );
                self.console.failure(&err.to_string());
                Err(err)
            }
            Err(RetryError::Operation(err)) => {
                Err(interrupted(Stage::RetrySsh, target, snapshot, err))
            }
        }
    }

    async fn restore(&self, target: &Target, snapshot: &Utf8Path) -> Result<(), BootstrapError> {
        let console = self.console;
        let fail = |err: BootstrapError| interrupted(Stage::RestoreUserData, target, snapshot, err);

        console.status(&format!(
            "Stopping instance [{}] to restore original user-data",
            target.name
        ));
        self.directory
            .stop_instance(&target.id)
            .await
            .map_err(|source| fail(cloud_error(Stage::RestoreUserData, target, source)))?;

        console.status("converting original user-data file to base64");
        let payload = self.snapshots.stage_restore().map_err(fail)?;

        console.status(&format!(
            "restoring original user-data to instance [{}]",
            target.name
        ));
        self.directory
            .set_user_data(&target.id, &payload)
            .map_err(|source| fail(cloud_error(Stage::RestoreUserData, target, source)))?;

        console.status(&format!("starting instance [{}]", target.name));
        let state = self
            .directory
            .start_instance(&target.id)
            .await
            .map_err(|source| fail(cloud_error(Stage::RestoreUserData, target, source)))?;
        target.refresh(state.public_ip);
        info!(
            stage = %Stage::RestoreUserData,
            instance_id = %target.id,
            "original user-data restored"
        );
        Ok(())
    }
}

fn cloud_error(stage: Stage, target: &Target, source: CloudError) -> BootstrapError {
    BootstrapError::Cloud {
        stage,
        instance_id: target.id.clone(),
        source: Box::new(source),
    }
}

fn interrupted(
    stage: Stage,
    target: &Target,
    snapshot: &Utf8Path,
    source: BootstrapError,
) -> BootstrapError {
    error!(
        %stage,
        instance_id = %target.id,
        snapshot = %snapshot,
        error = %source,
        "bootstrap interrupted with temporary user-data applied"
    );
    BootstrapError::Interrupted {
        instance_id: target.id.clone(),
        stage,
        snapshot: snapshot.to_owned(),
        source: Box::new(source),
    }
}
