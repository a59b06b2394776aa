//! Profile-scoped provider access with power-state waits.

use camino::Utf8Path;
use tracing::{info, instrument};

use crate::retry::{RetryError, RetryPolicy, retry};

use super::{
    CloudError, CloudProvider, Instance, InstanceState, PowerState, Profile, Volume,
    VolumeModification,
};

/// Polling budgets for power transitions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PowerPolicy {
    /// Budget for reaching [`PowerState::Running`].
    pub start: RetryPolicy,
    /// Budget for reaching [`PowerState::Stopped`].
    pub stop: RetryPolicy,
}

/// A cloud provider bound to one credential profile.
#[derive(Clone, Debug)]
pub struct InstanceDirectory<P> {
    provider: P,
    profile: Profile,
    power: PowerPolicy,
}

impl<P: CloudProvider> InstanceDirectory<P> {
    /// Binds `provider` to `profile`.
    #[must_use]
    pub const fn new(provider: P, profile: Profile, power: PowerPolicy) -> Self {
        Self {
            provider,
            profile,
            power,
        }
    }

    /// Credential profile used for every call.
    #[must_use]
    pub const fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Lists named instances.
    ///
    /// # Errors
    ///
    /// Propagates provider failures.
    pub fn list_instances(&self) -> Result<Vec<Instance>, CloudError> {
        self.provider.list_instances(&self.profile)
    }

    /// Lists volumes attached to `instance_id`.
    ///
    /// # Errors
    ///
    /// Propagates provider failures.
    pub fn list_volumes(&self, instance_id: &str) -> Result<Vec<Volume>, CloudError> {
        self.provider.list_volumes(&self.profile, instance_id)
    }

    /// Requests a volume resize.
    ///
    /// # Errors
    ///
    /// Propagates provider failures.
    pub fn resize_volume(
        &self,
        volume_id: &str,
        size_gb: u32,
    ) -> Result<VolumeModification, CloudError> {
        self.provider.resize_volume(&self.profile, volume_id, size_gb)
    }

    /// Reads the decoded user-data of an instance.
    ///
    /// # Errors
    ///
    /// Propagates provider failures.
    pub fn user_data(&self, instance_id: &str) -> Result<Vec<u8>, CloudError> {
        self.provider.user_data(&self.profile, instance_id)
    }

    /// Replaces the user-data of an instance from a base64 payload file.
    ///
    /// # Errors
    ///
    /// Propagates provider failures.
    pub fn set_user_data(
        &self,
        instance_id: &str,
        encoded_payload: &Utf8Path,
    ) -> Result<(), CloudError> {
        self.provider
            .set_user_data(&self.profile, instance_id, encoded_payload)
    }

    /// Starts an instance and waits until it reports running.
    ///
    /// Returns the final state, whose public address may differ from the one
    /// the instance had before it was stopped.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::PowerStateTimeout`] when the start budget is
    /// spent, or any provider failure.
    pub async fn start_instance(&self, instance_id: &str) -> Result<InstanceState, CloudError> {
        self.transition(instance_id, PowerState::Running, &self.power.start)
            .await
    }

    /// Stops an instance and waits until it reports stopped.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::PowerStateTimeout`] when the stop budget is
    /// spent, or any provider failure.
    pub async fn stop_instance(&self, instance_id: &str) -> Result<InstanceState, CloudError> {
        self.transition(instance_id, PowerState::Stopped, &self.power.stop)
            .await
    }

    #[instrument(skip(self, policy), fields(profile = %self.profile))]
    async fn transition(
        &self,
        instance_id: &str,
        target: PowerState,
        policy: &RetryPolicy,
    ) -> Result<InstanceState, CloudError> {
        info!("requesting power state change");
        self.provider
            .request_power_state(&self.profile, instance_id, target)?;

        let provider = &self.provider;
        let profile = &self.profile;
        let what = format!("instance {instance_id} reaching {target}");
        let outcome = retry(
            policy,
            &what,
            move || async move { provider.instance_state(profile, instance_id) },
            |state: &InstanceState| state.is(target),
        )
        .await;

        match outcome {
            Ok(state) => {
                info!(code = state.code, "power state reached");
                Ok(state)
            }
            Err(RetryError::Operation(err)) => Err(err),
            Err(RetryError::Exhausted { attempts, .. }) => Err(CloudError::PowerStateTimeout {
                instance_id: instance_id.to_owned(),
                target,
                attempts,
            }),
        }
    }
}
