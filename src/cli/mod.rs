//! Command-line interface definitions for the `diskops` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `diskops` binary.
#[derive(Debug, Parser)]
#[command(
    name = "diskops",
    version,
    about = "Grow and clean EC2 instance disks through the aws and ssh command-line tools",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log debug events to stderr (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    pub(crate) verbose: bool,
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Operations offered by `diskops`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Grow a root volume and, optionally, its partition and file system.
    #[command(name = "increase-disk-size")]
    IncreaseDiskSize(IncreaseDiskSizeCommand),
    /// Free disk space by vacuuming journals and purging package caches.
    #[command(name = "clean-disk")]
    CleanDisk(CleanDiskCommand),
}

/// Arguments for `diskops increase-disk-size`.
#[derive(Debug, Args)]
pub(crate) struct IncreaseDiskSizeCommand {
    /// AWS credential profile used for every provider call.
    #[arg(long, default_value = "default", value_name = "PROFILE")]
    pub(crate) profile: String,
    /// Choose volumes and the target size interactively.
    #[arg(long)]
    pub(crate) advanced_mode: bool,
    /// Grow the partition and file system over SSH after resizing.
    #[arg(long)]
    pub(crate) automatic_partition_resize: bool,
}

/// Arguments for `diskops clean-disk`.
#[derive(Debug, Args)]
pub(crate) struct CleanDiskCommand {
    /// AWS credential profile used for every provider call.
    #[arg(long, default_value = "default", value_name = "PROFILE")]
    pub(crate) profile: String,
}
