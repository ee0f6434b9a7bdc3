//! CLI command definitions and dispatch.

pub mod run;

use std::path::PathBuf;

use capsa_common::config::{OptionOverrides, RuntimeOptions};
use capsa_common::constants;
use clap::{Args, Parser, Subcommand};

/// Minimal daemon-less container runtime.
#[derive(Parser, Debug)]
#[command(name = "capsa", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global options; each falls back to its `_CONTAINER_*` variable.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalArgs {
    /// Storage driver options.
    #[arg(long, global = true, env = constants::STORAGE_OPT_ENV, value_name = "OPT")]
    pub storage_opt: Option<String>,

    /// Persistent layer storage directory.
    #[arg(long, global = true, env = constants::GRAPH_ROOT_ENV, value_name = "DIR")]
    pub graph_root: Option<PathBuf>,

    /// Ephemeral runtime state directory.
    #[arg(long, global = true, env = constants::RUN_ROOT_ENV, value_name = "DIR")]
    pub run_root: Option<PathBuf>,

    /// Log file.
    #[arg(long, global = true, env = constants::LOG_ENV, value_name = "PATH")]
    pub log: Option<PathBuf>,
}

impl GlobalArgs {
    /// Fills unset options with defaults for the calling user.
    #[must_use]
    pub fn resolve(&self) -> RuntimeOptions {
        let home = std::env::var_os("HOME").map(PathBuf::from);
        OptionOverrides {
            run_root: self.run_root.clone(),
            graph_root: self.graph_root.clone(),
            log: self.log.clone(),
            storage_opt: self.storage_opt.clone(),
        }
        .resolve(nix::unistd::Uid::current().as_raw(), home.as_deref())
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command in a new container.
    Run(run::RunArgs),
}

/// Dispatches the parsed command in the launcher.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli, options: &RuntimeOptions) -> anyhow::Result<i32> {
    match cli.command {
        Command::Run(args) => run::execute(&args, options),
    }
}

/// Dispatches the parsed command in the re-executed inner phase.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute_inner(cli: Cli, options: &RuntimeOptions) -> anyhow::Result<i32> {
    match cli.command {
        Command::Run(args) => run::execute_inner(args, options),
    }
}
