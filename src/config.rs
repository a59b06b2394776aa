//! Configuration loading via `ortho-config`.
//!
//! [`ToolConfig`] merges defaults, `diskops.toml` (or `.diskops.toml`, or the
//! file named by `DISKOPS_CONFIG_PATH`) and `DISKOPS_*` environment
//! variables. The command line only carries per-run choices such as the
//! credential profile; everything else lives here.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::bootstrap::{BootstrapSettings, KeyPaths};
use crate::cloud::PowerPolicy;
use crate::local_fs::expand_tilde;
use crate::remote::SshSettings;
use crate::retry::RetryPolicy;
use crate::workflow::DiskLayout;

/// Tool settings derived from defaults, configuration files and environment
/// variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "DISKOPS",
    discovery(
        app_name = "diskops",
        env_var = "DISKOPS_CONFIG_PATH",
        config_file_name = "diskops.toml",
        dotfile_name = ".diskops.toml",
        project_file_name = "diskops.toml"
    )
)]
pub struct ToolConfig {
    /// Path to the `aws` executable.
    #[ortho_config(default = "aws".to_owned())]
    pub aws_bin: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `ssh-keygen` executable.
    #[ortho_config(default = "ssh-keygen".to_owned())]
    pub ssh_keygen_bin: String,
    /// Login user on managed instances.
    #[ortho_config(default = "ubuntu".to_owned())]
    pub ssh_user: String,
    /// Known hosts file; defaults to `/dev/null` because instance addresses
    /// change across restarts.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// SSH connect timeout in seconds.
    #[ortho_config(default = 10)]
    pub ssh_connect_timeout_secs: u64,
    /// Key tried when no tool-managed key exists yet. Supports `~/`.
    #[ortho_config(default = "~/.ssh/id_rsa".to_owned())]
    pub default_key_path: String,
    /// Where generated keys are written and looked for first. Supports `~/`.
    #[ortho_config(default = "~/.ssh/diskops_rsa".to_owned())]
    pub managed_key_path: String,
    /// Directory holding user-data snapshots and staged payloads.
    #[ortho_config(default = ".".to_owned())]
    pub work_dir: String,
    /// Seconds between polls of a pending condition.
    #[ortho_config(default = 10)]
    pub poll_interval_secs: u64,
    /// Polls allowed while waiting for an instance to start.
    #[ortho_config(default = 60)]
    pub start_attempts: u32,
    /// Polls allowed while waiting for an instance to stop.
    #[ortho_config(default = 30)]
    pub stop_attempts: u32,
    /// SSH attempts allowed after a new key was injected.
    #[ortho_config(default = 30)]
    pub ssh_attempts: u32,
    /// Times an unreachable instance is started before giving up.
    #[ortho_config(default = 3)]
    pub wake_attempts: u32,
    /// Size, in gigabytes, of the volumes the resize workflow targets.
    #[ortho_config(default = 8)]
    pub original_size_gb: u32,
    /// Size, in gigabytes, those volumes are grown to.
    #[ortho_config(default = 16)]
    pub requested_size_gb: u32,
    /// Root block device on the instance.
    #[ortho_config(default = "/dev/nvme0n1".to_owned())]
    pub root_device: String,
    /// Partition number of the root filesystem on that device.
    #[ortho_config(default = 1)]
    pub root_partition: u32,
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing {field}: set DISKOPS_{env_suffix} or add {field} to diskops.toml", env_suffix = field.to_uppercase())]
    MissingField {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Indicates a numeric field holds a value the tool cannot use.
    #[error("invalid {field}: {reason}; set DISKOPS_{env_suffix} or {field} in diskops.toml", env_suffix = field.to_uppercase())]
    InvalidValue {
        /// Configuration field that failed validation.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

impl ToolConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("diskops")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Rejects blank strings and zero-valued counters.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for blank values and
    /// [`ConfigError::InvalidValue`] for unusable numbers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (value, field) in [
            (&self.aws_bin, "aws_bin"),
            (&self.ssh_bin, "ssh_bin"),
            (&self.ssh_keygen_bin, "ssh_keygen_bin"),
            (&self.ssh_user, "ssh_user"),
            (&self.ssh_known_hosts_file, "ssh_known_hosts_file"),
            (&self.default_key_path, "default_key_path"),
            (&self.managed_key_path, "managed_key_path"),
            (&self.work_dir, "work_dir"),
            (&self.root_device, "root_device"),
        ] {
            Self::require_value(value, field)?;
        }

        for (value, field) in [
            (self.ssh_connect_timeout_secs, "ssh_connect_timeout_secs"),
            (self.poll_interval_secs, "poll_interval_secs"),
            (u64::from(self.start_attempts), "start_attempts"),
            (u64::from(self.stop_attempts), "stop_attempts"),
            (u64::from(self.ssh_attempts), "ssh_attempts"),
            (u64::from(self.wake_attempts), "wake_attempts"),
            (u64::from(self.original_size_gb), "original_size_gb"),
            (u64::from(self.requested_size_gb), "requested_size_gb"),
            (u64::from(self.root_partition), "root_partition"),
        ] {
            Self::require_positive(value, field)?;
        }

        if self.requested_size_gb <= self.original_size_gb {
            return Err(ConfigError::InvalidValue {
                field: String::from("requested_size_gb"),
                reason: format!(
                    "must be larger than original_size_gb ({})",
                    self.original_size_gb
                ),
            });
        }
        Ok(())
    }

    /// SSH client settings for remote commands.
    #[must_use]
    pub fn ssh_settings(&self) -> SshSettings {
        SshSettings {
            ssh_bin: self.ssh_bin.clone(),
            user: self.ssh_user.clone(),
            known_hosts_file: self.ssh_known_hosts_file.clone(),
            connect_timeout_secs: self.ssh_connect_timeout_secs,
        }
    }

    /// Polling budgets for power transitions.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a budget is zero.
    pub fn power_policy(&self) -> Result<PowerPolicy, ConfigError> {
        Ok(PowerPolicy {
            start: self.policy(self.start_attempts, "start_attempts")?,
            stop: self.policy(self.stop_attempts, "stop_attempts")?,
        })
    }

    /// Settings for establishing SSH access.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when the SSH budget is zero.
    pub fn bootstrap_settings(&self) -> Result<BootstrapSettings, ConfigError> {
        Ok(BootstrapSettings {
            keys: KeyPaths {
                managed: expand_tilde(&self.managed_key_path),
                fallback: expand_tilde(&self.default_key_path),
            },
            work_dir: expand_tilde(&self.work_dir),
            login_user: self.ssh_user.clone(),
            ssh_keygen_bin: self.ssh_keygen_bin.clone(),
            ssh_policy: self.policy(self.ssh_attempts, "ssh_attempts")?,
            wake_attempts: self.wake_attempts,
        })
    }

    /// Volume sizes and partition layout used by the resize workflow.
    #[must_use]
    pub fn disk_layout(&self) -> DiskLayout {
        DiskLayout {
            original_size_gb: self.original_size_gb,
            requested_size_gb: self.requested_size_gb,
            root_device: self.root_device.clone(),
            root_partition: self.root_partition,
        }
    }

    fn policy(&self, attempts: u32, field: &str) -> Result<RetryPolicy, ConfigError> {
        RetryPolicy::new(attempts, Duration::from_secs(self.poll_interval_secs)).map_err(|err| {
            ConfigError::InvalidValue {
                field: field.to_owned(),
                reason: err.to_string(),
            }
        })
    }

    fn require_value(value: &str, field: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: field.to_owned(),
            });
        }
        Ok(())
    }

    fn require_positive(value: u64, field: &str) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::InvalidValue {
                field: field.to_owned(),
                reason: String::from("must be greater than zero"),
            });
        }
        Ok(())
    }
}
