//! Error types for SSH bootstrap.

use std::fmt;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::cloud::CloudError;
use crate::prompt::PromptError;

/// Step of the bootstrap protocol, carried on errors and log events.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// Looking for a usable local key.
    ProbeExistingKey,
    /// Testing a key against the instance.
    TrySsh,
    /// Stopping the instance before touching its user-data.
    StopInstance,
    /// Saving the current user-data locally.
    SnapshotUserData,
    /// Generating the tool-managed key pair.
    GenerateKey,
    /// Uploading user-data that authorises the new key.
    InjectKey,
    /// Starting the instance so cloud-init applies the new key.
    StartInstance,
    /// Waiting for the new key to be accepted.
    RetrySsh,
    /// Putting the original user-data back.
    RestoreUserData,
}

impl Stage {
    /// Kebab-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProbeExistingKey => "probe-existing-key",
            Self::TrySsh => "try-ssh",
            Self::StopInstance => "stop-instance",
            Self::SnapshotUserData => "snapshot-user-data",
            Self::GenerateKey => "generate-key",
            Self::InjectKey => "inject-key",
            Self::StartInstance => "start-instance",
            Self::RetrySsh => "retry-ssh",
            Self::RestoreUserData => "restore-user-data",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while establishing SSH access.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BootstrapError {
    /// The operator could not be asked for a key path.
    #[error(transparent)]
    Prompt(#[from] PromptError),
    /// A cloud call failed before any user-data was changed.
    #[error("{stage} failed for instance {instance_id}: {source}")]
    Cloud {
        /// Step that issued the call.
        stage: Stage,
        /// Instance being bootstrapped.
        instance_id: String,
        /// Underlying provider error.
        #[source]
        source: Box<CloudError>,
    },
    /// The instance never answered SSH despite being started.
    #[error(
        "instance {instance_id} ({host}) did not answer ssh after {attempts} start attempts"
    )]
    HostUnreachable {
        /// Instance being bootstrapped.
        instance_id: String,
        /// Last address tried, or `no public address`.
        host: String,
        /// Start attempts made.
        attempts: u32,
    },
    /// A local file needed by the protocol could not be read or written.
    #[error("{stage}: cannot access {path}: {message}")]
    LocalFile {
        /// Step that touched the file.
        stage: Stage,
        /// File involved.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// `ssh-keygen` did not produce a key pair.
    #[error("cannot generate a new local ssh key at {path}: {message}")]
    KeyGeneration {
        /// Private key path requested.
        path: Utf8PathBuf,
        /// What went wrong.
        message: String,
    },
    /// The new key was never accepted. The instance is running with the
    /// temporary user-data and must be restored by hand.
    #[error(
        "failed connecting to instance {instance_id} too many times ({attempts} attempts) with \
         the new key; the instance is running with temporary user-data, restore it manually \
         from {snapshot}"
    )]
    BootstrapFailed {
        /// Instance being bootstrapped.
        instance_id: String,
        /// SSH attempts made.
        attempts: u32,
        /// Snapshot of the original user-data.
        snapshot: Utf8PathBuf,
    },
    /// A step after the key was injected failed, so the instance still
    /// carries the temporary user-data.
    #[error(
        "bootstrap of instance {instance_id} aborted at {stage} with temporary user-data still \
         applied; restore it manually from {snapshot}: {source}"
    )]
    Interrupted {
        /// Instance being bootstrapped.
        instance_id: String,
        /// Step that failed.
        stage: Stage,
        /// Snapshot of the original user-data.
        snapshot: Utf8PathBuf,
        /// What failed.
        #[source]
        source: Box<BootstrapError>,
    },
}
