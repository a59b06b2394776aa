//! Binary entry point for the `diskops` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use diskops::{
    AwsCli, CleanOutcome, ConfigError, InquirePrompt, ProcessCommandRunner, Profile, ResizeOptions,
    ResizeOutcome, TerminalConsole, ToolConfig, WorkflowError, Workflows,
};

mod cli;

use cli::{Cli, CleanDiskCommand, Command, IncreaseDiskSizeCommand};

const DEFAULT_LOG_FILTER: &str = "diskops=info";
const VERBOSE_LOG_FILTER: &str = "diskops=debug";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match dispatch(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "command failed");
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(command: Command) -> Result<i32, CliError> {
    match command {
        Command::IncreaseDiskSize(args) => increase_disk_size(args).await,
        Command::CleanDisk(args) => clean_disk(args).await,
    }
}

type TerminalWorkflows =
    Workflows<AwsCli<ProcessCommandRunner>, ProcessCommandRunner, InquirePrompt, TerminalConsole>;

fn workflows(profile: String) -> Result<TerminalWorkflows, CliError> {
    let config = ToolConfig::load_without_cli_args()?;
    debug!(?config, "configuration loaded");
    Ok(Workflows::from_config(
        &config,
        Profile::new(profile),
        ProcessCommandRunner,
        InquirePrompt,
        TerminalConsole,
    )?)
}

async fn increase_disk_size(args: IncreaseDiskSizeCommand) -> Result<i32, CliError> {
    let options = ResizeOptions {
        advanced_mode: args.advanced_mode,
        automatic_partition_resize: args.automatic_partition_resize,
    };
    let outcome = workflows(args.profile)?.increase_disk_size(options).await?;
    Ok(match outcome {
        ResizeOutcome::Declined | ResizeOutcome::Quit => 0,
        ResizeOutcome::Completed(report) => exit_code_for(report.is_clean()),
    })
}

async fn clean_disk(args: CleanDiskCommand) -> Result<i32, CliError> {
    let outcome = workflows(args.profile)?.clean_disk().await?;
    Ok(match outcome {
        CleanOutcome::Declined => 0,
        CleanOutcome::Completed(report) => exit_code_for(report.is_clean()),
    })
}

const fn exit_code_for(clean: bool) -> i32 {
    if clean { 0 } else { 1 }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_error_prefixes_configuration_errors() {
        let mut buf = Vec::new();
        let err = CliError::Config(ConfigError::MissingField {
            field: String::from("aws_bin"),
        });
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert_eq!(
            rendered,
            "configuration error: missing aws_bin: set DISKOPS_AWS_BIN or add aws_bin to diskops.toml\n"
        );
    }

    #[test]
    fn write_error_renders_workflow_errors_verbatim() {
        let mut buf = Vec::new();
        let err = CliError::Workflow(WorkflowError::NoUsableResource(String::from(
            "No instances found! cannot continue",
        )));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert_eq!(rendered, "No instances found! cannot continue\n");
    }

    #[test]
    fn failed_steps_exit_non_zero() {
        assert_eq!(exit_code_for(true), 0);
        assert_eq!(exit_code_for(false), 1);
    }

    #[test]
    fn profile_defaults_to_default() {
        let cli = Cli::try_parse_from(["diskops", "clean-disk"]).expect("parse");
        assert!(
            matches!(cli.command, Command::CleanDisk(ref args) if args.profile == "default"),
            "unexpected command: {:?}",
            cli.command
        );
    }

    #[test]
    fn increase_disk_size_flags_parse() {
        let cli = Cli::try_parse_from([
            "diskops",
            "-v",
            "increase-disk-size",
            "--profile",
            "staging",
            "--advanced-mode",
            "--automatic-partition-resize",
        ])
        .expect("parse");
        assert!(cli.verbose);
        let Command::IncreaseDiskSize(args) = cli.command else {
            panic!("expected increase-disk-size");
        };
        assert_eq!(args.profile, "staging");
        assert!(args.advanced_mode);
        assert!(args.automatic_partition_resize);
    }
}
