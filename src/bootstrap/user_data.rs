//! Provisioning payloads and local user-data snapshots.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use camino::{Utf8Path, Utf8PathBuf};

use crate::local_fs;

use super::{BootstrapError, Stage};

/// Snapshot of the instance's original user-data.
pub const ORIGINAL_SNAPSHOT_FILE: &str = "temp_user_data__original";

/// Plain-text cloud-config that authorises the new key.
pub const INJECTED_PAYLOAD_FILE: &str = "temp_user_data__w_ssh_key";

/// Suffix of the base64 variant uploaded to the provider.
pub const ENCODED_SUFFIX: &str = "__base64";

/// Cloud-config that appends `public_key` to `user`'s authorised keys.
///
/// `users-groups` is forced to run on every boot so the key is applied to an
/// instance that was provisioned long ago.
#[must_use]
pub fn authorized_key_document(user: &str, public_key: &str) -> String {
    format!(
        "#cloud-config\n\
         cloud_final_modules:\n\
         - [users-groups, always]\n\
         users:\n  \
           - name: {user}\n    \
             ssh-authorized-keys:\n    \
             - {key}\n",
        key = public_key.trim()
    )
}

/// Files staged in the work directory during one bootstrap.
///
/// Names are fixed, so only one bootstrap may use a work directory at a
/// time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotStore {
    dir: Utf8PathBuf,
}

impl SnapshotStore {
    /// Stages files under `dir`.
    #[must_use]
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the original user-data snapshot.
    #[must_use]
    pub fn original_path(&self) -> Utf8PathBuf {
        self.dir.join(ORIGINAL_SNAPSHOT_FILE)
    }

    /// Writes the original user-data snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::LocalFile`] when the file cannot be written.
    pub fn capture(&self, user_data: &[u8]) -> Result<Utf8PathBuf, BootstrapError> {
        let path = self.original_path();
        write(Stage::SnapshotUserData, &path, user_data)?;
        Ok(path)
    }

    /// Writes the key-injection document and its base64 variant, returning
    /// the path to upload.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::LocalFile`] when a file cannot be written.
    pub fn stage_injection(&self, document: &str) -> Result<Utf8PathBuf, BootstrapError> {
        let plain = self.dir.join(INJECTED_PAYLOAD_FILE);
        write(Stage::InjectKey, &plain, document.as_bytes())?;
        self.encode(Stage::InjectKey, &plain, document.as_bytes())
    }

    /// Encodes the snapshot for upload, returning the path to upload.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::LocalFile`] when the snapshot cannot be read
    /// or the encoded file cannot be written.
    pub fn stage_restore(&self) -> Result<Utf8PathBuf, BootstrapError> {
        let original = self.original_path();
        let bytes =
            local_fs::read_bytes(&original).map_err(|message| BootstrapError::LocalFile {
                stage: Stage::RestoreUserData,
                path: original.clone(),
                message,
            })?;
        self.encode(Stage::RestoreUserData, &original, &bytes)
    }

    fn encode(
        &self,
        stage: Stage,
        plain: &Utf8Path,
        bytes: &[u8],
    ) -> Result<Utf8PathBuf, BootstrapError> {
        let encoded = Utf8PathBuf::from(format!("{plain}{ENCODED_SUFFIX}"));
        write(stage, &encoded, STANDARD.encode(bytes).as_bytes())?;
        Ok(encoded)
    }
}

fn write(stage: Stage, path: &Utf8Path, contents: &[u8]) -> Result<(), BootstrapError> {
    local_fs::write_bytes(path, contents).map_err(|message| BootstrapError::LocalFile {
        stage,
        path: path.to_owned(),
        message,
    })
}
