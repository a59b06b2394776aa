//! [`CloudProvider`] backed by the `aws` command line tool.
//!
//! Every call shells out to `aws ec2 <operation> --profile <name>` with JSON
//! output and decodes the response with serde. When decoding fails the raw
//! stderr of the CLI is attached to the error; an empty stdout almost always
//! means the CLI printed the real reason there.

use std::ffi::OsString;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use camino::Utf8Path;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::exec::{CommandOutput, CommandRunner};

use super::{
    CloudError, CloudProvider, Instance, InstanceState, PowerState, Profile, Volume,
    VolumeModification,
};

const NAME_TAG: &str = "Name";

/// Drives EC2 through the `aws` CLI.
#[derive(Clone, Debug)]
pub struct AwsCli<R: CommandRunner> {
    program: String,
    runner: R,
}

impl<R: CommandRunner> AwsCli<R> {
    /// Creates a provider that invokes `program` through `runner`.
    #[must_use]
    pub fn new(program: impl Into<String>, runner: R) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    fn ec2(
        &self,
        operation: &str,
        profile: &Profile,
        extra: &[&str],
    ) -> Result<CommandOutput, CloudError> {
        let mut args: Vec<OsString> = vec![
            OsString::from("ec2"),
            OsString::from(operation),
            OsString::from("--profile"),
            OsString::from(profile.as_str()),
        ];
        args.extend(extra.iter().map(OsString::from));
        debug!(program = %self.program, operation, profile = %profile, "invoking cloud CLI");
        Ok(self.runner.run(&self.program, &args)?)
    }

    fn query<T: DeserializeOwned>(
        &self,
        operation: &str,
        profile: &Profile,
        extra: &[&str],
    ) -> Result<T, CloudError> {
        let output = self.ec2(operation, profile, extra)?;
        parse_response(operation, &output)
    }

    fn command(
        &self,
        operation: &str,
        profile: &Profile,
        extra: &[&str],
    ) -> Result<(), CloudError> {
        let output = self.ec2(operation, profile, extra)?;
        if output.is_success() {
            return Ok(());
        }
        error!(operation, stderr = %output.stderr, "cloud CLI command failed");
        Err(CloudError::CommandFailure {
            program: self.program.clone(),
            operation: operation.to_owned(),
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr,
        })
    }
}

impl<R: CommandRunner> CloudProvider for AwsCli<R> {
    fn list_instances(&self, profile: &Profile) -> Result<Vec<Instance>, CloudError> {
        let response: DescribeInstances =
            self.query("describe-instances", profile, &["--output", "json"])?;
        Ok(instances_from_reservations(&response))
    }

    fn list_volumes(
        &self,
        profile: &Profile,
        instance_id: &str,
    ) -> Result<Vec<Volume>, CloudError> {
        let filter = format!("Name=attachment.instance-id,Values={instance_id}");
        let response: DescribeVolumes = self.query(
            "describe-volumes",
            profile,
            &["--filters", &filter, "--output", "json"],
        )?;
        Ok(response
            .volumes
            .into_iter()
            .map(|volume| Volume {
                id: volume.volume_id,
                size_gb: volume.size,
                volume_type: volume.volume_type,
            })
            .collect())
    }

    fn resize_volume(
        &self,
        profile: &Profile,
        volume_id: &str,
        size_gb: u32,
    ) -> Result<VolumeModification, CloudError> {
        let size = size_gb.to_string();
        let response: ModifyVolume = self.query(
            "modify-volume",
            profile,
            &["--size", &size, "--volume-id", volume_id, "--output", "json"],
        )?;
        let modification = response.volume_modification;
        Ok(VolumeModification {
            volume_id: modification.volume_id,
            original_size_gb: modification.original_size,
            target_size_gb: modification.target_size,
        })
    }

    fn request_power_state(
        &self,
        profile: &Profile,
        instance_id: &str,
        target: PowerState,
    ) -> Result<(), CloudError> {
        let operation = match target {
            PowerState::Running => "start-instances",
            PowerState::Stopped => "stop-instances",
        };
        self.command(
            operation,
            profile,
            &["--instance-ids", instance_id, "--output", "json"],
        )
    }

    fn instance_state(
        &self,
        profile: &Profile,
        instance_id: &str,
    ) -> Result<InstanceState, CloudError> {
        let response: DescribeInstances = self.query(
            "describe-instances",
            profile,
            &["--instance-ids", instance_id, "--output", "json"],
        )?;
        response
            .reservations
            .iter()
            .flat_map(|reservation| reservation.instances.iter())
            .find(|instance| instance.instance_id == instance_id)
            .and_then(|instance| {
                instance.state.as_ref().map(|state| InstanceState {
                    code: state.code,
                    public_ip: parse_ip(instance.public_ip_address.as_deref()),
                })
            })
            .ok_or_else(|| CloudError::InstanceNotFound {
                instance_id: instance_id.to_owned(),
            })
    }

    fn user_data(&self, profile: &Profile, instance_id: &str) -> Result<Vec<u8>, CloudError> {
        let response: InstanceAttribute = self.query(
            "describe-instance-attribute",
            profile,
            &[
                "--instance-id",
                instance_id,
                "--attribute",
                "userData",
                "--output",
                "json",
            ],
        )?;
        let Some(encoded) = response.user_data.and_then(|attribute| attribute.value) else {
            return Ok(Vec::new());
        };
        STANDARD
            .decode(encoded.trim())
            .map_err(|err| CloudError::Decode {
                what: String::from("user-data"),
                instance_id: instance_id.to_owned(),
                message: err.to_string(),
            })
    }

    fn set_user_data(
        &self,
        profile: &Profile,
        instance_id: &str,
        encoded_payload: &Utf8Path,
    ) -> Result<(), CloudError> {
        let value = format!("file://{encoded_payload}");
        self.command(
            "modify-instance-attribute",
            profile,
            &[
                "--instance-id",
                instance_id,
                "--attribute",
                "userData",
                "--value",
                &value,
            ],
        )
    }
}

fn parse_response<T: DeserializeOwned>(
    operation: &str,
    output: &CommandOutput,
) -> Result<T, CloudError> {
    serde_json::from_str(&output.stdout).map_err(|err| {
        error!(operation, stderr = %output.stderr, "cloud CLI returned unreadable output");
        CloudError::ProviderQuery {
            operation: operation.to_owned(),
            message: err.to_string(),
            stderr: output.stderr.clone(),
        }
    })
}

fn parse_ip(raw: Option<&str>) -> Option<std::net::IpAddr> {
    raw.and_then(|ip| ip.parse().ok())
}

/// Flattens a `describe-instances` response into named instances.
///
/// Instances without a `Name` tag are dropped; provider order is kept.
#[must_use]
pub fn instances_from_reservations(response: &DescribeInstances) -> Vec<Instance> {
    response
        .reservations
        .iter()
        .flat_map(|reservation| reservation.instances.iter())
        .filter_map(|instance| {
            let name = instance
                .tags
                .iter()
                .find(|tag| tag.key == NAME_TAG)
                .map(|tag| tag.value.clone())?;
            Some(Instance {
                id: instance.instance_id.clone(),
                name,
                public_ip: parse_ip(instance.public_ip_address.as_deref()),
            })
        })
        .collect()
}

/// Response of `ec2 describe-instances`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeInstances {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<RawInstance>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInstance {
    instance_id: String,
    #[serde(default)]
    tags: Vec<Tag>,
    public_ip_address: Option<String>,
    state: Option<RawState>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Tag {
    key: String,
    value: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawState {
    code: u16,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeVolumes {
    #[serde(default)]
    volumes: Vec<RawVolume>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawVolume {
    volume_id: String,
    size: u32,
    volume_type: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ModifyVolume {
    volume_modification: RawModification,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawModification {
    volume_id: String,
    original_size: u32,
    target_size: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceAttribute {
    user_data: Option<AttributeValue>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AttributeValue {
    value: Option<String>,
}
