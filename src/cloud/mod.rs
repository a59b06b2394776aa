//! Cloud resource directory.
//!
//! [`CloudProvider`] is the seam over the provider tooling: listing named
//! instances and their volumes, resizing volumes, driving power state and
//! reading or replacing instance user-data. [`InstanceDirectory`] layers the
//! polling waits for power transitions on top of a provider and carries the
//! credential profile so callers never thread it through by hand.

use camino::Utf8Path;

mod aws;
mod directory;
mod error;
mod types;

pub use aws::{AwsCli, instances_from_reservations};
pub use directory::{InstanceDirectory, PowerPolicy};
pub use error::CloudError;
pub use types::{Instance, InstanceState, PowerState, Profile, Volume, VolumeModification};

/// Provider operations the workflows depend on.
///
/// Implementations are synchronous; waiting is handled by
/// [`InstanceDirectory`].
pub trait CloudProvider {
    /// Lists instances carrying a `Name` tag.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError`] when the provider cannot be queried or its
    /// output cannot be decoded.
    fn list_instances(&self, profile: &Profile) -> Result<Vec<Instance>, CloudError>;

    /// Lists volumes attached to `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError`] when the provider cannot be queried or its
    /// output cannot be decoded.
    fn list_volumes(&self, profile: &Profile, instance_id: &str)
    -> Result<Vec<Volume>, CloudError>;

    /// Requests that `volume_id` grow to `size_gb`.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError`] when the provider rejects the request.
    fn resize_volume(
        &self,
        profile: &Profile,
        volume_id: &str,
        size_gb: u32,
    ) -> Result<VolumeModification, CloudError>;

    /// Issues a start or stop request without waiting for it to finish.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError`] when the provider rejects the request.
    fn request_power_state(
        &self,
        profile: &Profile,
        instance_id: &str,
        target: PowerState,
    ) -> Result<(), CloudError>;

    /// Reads the current power state and public address of an instance.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::InstanceNotFound`] when the instance is unknown.
    fn instance_state(&self, profile: &Profile, instance_id: &str)
    -> Result<InstanceState, CloudError>;

    /// Returns the decoded user-data of an instance; empty when unset.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError`] when the attribute cannot be read or decoded.
    fn user_data(&self, profile: &Profile, instance_id: &str) -> Result<Vec<u8>, CloudError>;

    /// Replaces the user-data of a stopped instance with the base64 payload
    /// stored at `encoded_payload`.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError`] when the provider rejects the update.
    fn set_user_data(
        &self,
        profile: &Profile,
        instance_id: &str,
        encoded_payload: &Utf8Path,
    ) -> Result<(), CloudError>;
}
