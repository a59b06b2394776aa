//! Normalised cloud resource records.

use std::fmt;
use std::net::IpAddr;

/// Named credential profile forwarded verbatim to the cloud CLI.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Profile(String);

impl Profile {
    /// Wraps a profile name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Profile name as passed to `--profile`.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::new("default")
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named compute instance.
///
/// Only instances carrying a `Name` tag are surfaced by providers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    /// Provider-assigned identifier.
    pub id: String,
    /// Value of the `Name` tag.
    pub name: String,
    /// Public address; absent while the instance is stopped.
    pub public_ip: Option<IpAddr>,
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// A block storage volume attached to an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Volume {
    /// Provider-assigned identifier.
    pub id: String,
    /// Size in gigabytes.
    pub size_gb: u32,
    /// Provider volume class, e.g. `gp2`.
    pub volume_type: String,
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (type:{}, size:{}GB)",
            self.id, self.volume_type, self.size_gb
        )
    }
}

/// Acknowledgement of an accepted volume resize.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeModification {
    /// Volume being resized.
    pub volume_id: String,
    /// Size before the change, in gigabytes.
    pub original_size_gb: u32,
    /// Requested size, in gigabytes.
    pub target_size_gb: u32,
}

/// Power states the tool drives instances into.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PowerState {
    /// Instance is booted.
    Running,
    /// Instance is halted.
    Stopped,
}

impl PowerState {
    /// Numeric state code reported by the provider.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Running => 16,
            Self::Stopped => 80,
        }
    }

    /// Lower-case label used in logs and messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of an instance's power state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InstanceState {
    /// Provider state code; transitional states use codes other than
    /// those of [`PowerState`].
    pub code: u16,
    /// Public address at the time of the query.
    pub public_ip: Option<IpAddr>,
}

impl InstanceState {
    /// Returns true when the code matches `state`.
    #[must_use]
    pub const fn is(&self, state: PowerState) -> bool {
        self.code == state.code()
    }
}
