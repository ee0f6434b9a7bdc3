//! `capsa run`: run a command in a new container.
//!
//! The launcher only validates the arguments and re-executes itself in new
//! namespaces, forwarding them; the inner phase parses them again and does
//! the actual work.

use std::path::PathBuf;

use anyhow::Context;
use capsa_common::config::RuntimeOptions;
use capsa_common::constants::DEFAULT_WORKDIR;
use capsa_common::types::VolumeSpec;
use capsa_core::syscall::LinuxSyscall;
use capsa_image::storage::{OverlayStore, StoreOptions};
use capsa_runtime::bootstrap::{ReexecRequest, spawn_reexec};
use capsa_runtime::container::Container;
use clap::Args;

/// Arguments for the `run` command.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct RunArgs {
    /// Environment variable for the command (repeatable).
    #[arg(short = 'e', long = "env", value_name = "VAR=value", value_parser = parse_env_entry)]
    pub env: Vec<String>,

    /// Bind mount a host directory into the container (repeatable).
    #[arg(short = 'v', long = "volume", value_name = "hostPath:containerPath")]
    pub volumes: Vec<VolumeSpec>,

    /// Working directory inside the container, absolute.
    #[arg(
        short = 'w',
        long = "workdir",
        value_name = "DIR",
        default_value = DEFAULT_WORKDIR,
        value_parser = parse_workdir
    )]
    pub workdir: PathBuf,

    /// Allocate a pseudo-terminal.
    #[arg(short = 't', long)]
    pub tty: bool,

    /// Do not wait for the container to exit.
    #[arg(short = 'd', long)]
    pub detach: bool,

    /// Image name or ID.
    pub image: String,

    /// Command to run and its arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    /// Serializes the arguments for the inner phase, subcommand included.
    #[must_use]
    pub fn to_forward_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_owned()];
        for entry in &self.env {
            args.extend(["-e".to_owned(), entry.clone()]);
        }
        for volume in &self.volumes {
            args.extend(["-v".to_owned(), volume.to_string()]);
        }
        args.extend(["-w".to_owned(), self.workdir.display().to_string()]);
        if self.tty {
            args.push("-t".to_owned());
        }
        if self.detach {
            args.push("-d".to_owned());
        }
        args.push("--".to_owned());
        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }

    /// Builds the run request.
    #[must_use]
    pub fn into_container(self) -> Container {
        Container {
            image: self.image,
            command: self.command,
            workdir: self.workdir,
            env: self.env,
            volumes: self.volumes,
            tty: self.tty,
            detach: self.detach,
        }
    }
}

/// Starts the inner phase in new namespaces and waits for it unless
/// detached.
///
/// # Errors
///
/// Returns an error if the inner phase cannot be started or waited for.
pub fn execute(args: &RunArgs, options: &RuntimeOptions) -> anyhow::Result<i32> {
    let request = ReexecRequest::inner_phase(args.to_forward_args(), options.to_env());
    let child = spawn_reexec(&request).context("failed to start the container process")?;

    if args.detach {
        child.detach();
        return Ok(0);
    }
    child.wait().context("failed to wait for the container process")
}

/// Builds the container root and runs the command inside the namespaces.
///
/// # Errors
///
/// Returns an error if the store cannot be opened, the root cannot be
/// built, or the command cannot be started.
pub fn execute_inner(args: RunArgs, options: &RuntimeOptions) -> anyhow::Result<i32> {
    let store_options = StoreOptions::parse(options).context("invalid storage options")?;
    let store = OverlayStore::open(store_options).context("failed to open the image store")?;

    let prepared = args
        .into_container()
        .prepare(&store, &LinuxSyscall)
        .context("failed to prepare the container")?;
    tracing::info!(image_id = %prepared.image_id(), "container root ready");
    prepared.run().context("failed to run the container command")
}

fn parse_env_entry(entry: &str) -> Result<String, String> {
    match entry.split_once('=') {
        Some((key, _)) if !key.is_empty() => Ok(entry.to_owned()),
        _ => Err(format!("expected VAR=value, got {entry:?}")),
    }
}

fn parse_workdir(dir: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(dir);
    if path.is_absolute() {
        Ok(path)
    } else {
        Err(format!("working directory must be absolute, got {dir:?}"))
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::commands::{Cli, Command};

    fn parse(args: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(std::iter::once("capsa").chain(args.iter().copied()))
            .expect("parse");
        match cli.command {
            Command::Run(run) => run,
        }
    }

    #[test]
    fn flags_after_image_are_parsed_until_the_command_starts() {
        let run = parse(&["run", "myimage", "-t", "-e", "FOO=bar", "/bin/echo", "hi"]);
        assert_eq!(run.image, "myimage");
        assert!(run.tty && !run.detach);
        assert_eq!(run.env, vec!["FOO=bar"]);
        assert_eq!(run.command, vec!["/bin/echo", "hi"]);
        assert_eq!(run.workdir, PathBuf::from("/"));
    }

    #[test]
    fn command_arguments_may_look_like_flags() {
        let run = parse(&["run", "myimage", "/bin/ls", "-la", "-t", "/data"]);
        assert!(!run.tty);
        assert_eq!(run.command, vec!["/bin/ls", "-la", "-t", "/data"]);
    }

    #[test]
    fn volumes_are_typed_and_repeatable() {
        let run = parse(&[
            "run", "-v", "/host/data:/data", "-v", "/srv:/srv", "myimage", "/bin/ls",
        ]);
        assert_eq!(run.volumes.len(), 2);
        assert_eq!(run.volumes[0].host_path, PathBuf::from("/host/data"));
        assert_eq!(run.volumes[0].container_path, PathBuf::from("/data"));
    }

    #[test]
    fn malformed_values_are_usage_errors() {
        for args in [
            &["capsa", "run", "myimage"][..],
            &["capsa", "run", "-e", "NOVALUE", "myimage", "/bin/true"][..],
            &["capsa", "run", "-v", "/host:relative", "myimage", "/bin/true"][..],
            &["capsa", "run", "-w", "data", "myimage", "/bin/true"][..],
        ] {
            let err = Cli::try_parse_from(args).unwrap_err();
            assert_eq!(err.exit_code(), 2, "{args:?}");
        }
    }

    #[test]
    fn forwarded_arguments_parse_back_identically() {
        let run = parse(&[
            "run", "-e", "A=1", "-e", "B=x=y", "-v", "/host/data:/data", "-w", "/data", "-t",
            "-d", "myimage", "/bin/sh", "-c", "ls -l",
        ]);
        let forwarded = run.to_forward_args();
        assert_eq!(forwarded.first().map(String::as_str), Some("run"));

        let reparsed = parse(&forwarded.iter().map(String::as_str).collect::<Vec<_>>());
        assert_eq!(reparsed, run);
    }

    #[test]
    fn image_that_looks_like_a_flag_survives_forwarding() {
        let run = RunArgs {
            env: Vec::new(),
            volumes: Vec::new(),
            workdir: PathBuf::from("/"),
            tty: false,
            detach: false,
            image: "-weird".into(),
            command: vec!["/bin/true".into()],
        };
        let forwarded = run.to_forward_args();
        let reparsed = parse(&forwarded.iter().map(String::as_str).collect::<Vec<_>>());
        assert_eq!(reparsed.image, "-weird");
    }

    #[test]
    fn container_keeps_every_request_field() {
        let run = parse(&["run", "-e", "FOO=bar", "-w", "/tmp", "-t", "myimage", "sh"]);
        let container = run.into_container();
        assert_eq!(container.image, "myimage");
        assert_eq!(container.env, vec!["FOO=bar"]);
        assert_eq!(container.workdir, PathBuf::from("/tmp"));
        assert!(container.tty);
    }
}
