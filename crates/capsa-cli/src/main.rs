//! # capsa
//!
//! Runs a command from an image inside new mount, UTS, IPC, PID and user
//! namespaces. The same binary is both the launcher and, re-executed as
//! `capsa-init`, the process that builds the container root.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;
mod logging;

use std::process::ExitCode;

use capsa_runtime::bootstrap::is_inner_phase;
use clap::Parser;

use crate::commands::Cli;

fn main() -> ExitCode {
    let args: Vec<_> = std::env::args_os().collect();
    let inner = args.first().is_some_and(|arg0| is_inner_phase(arg0));

    let cli = Cli::parse_from(args);
    let options = cli.global.resolve();
    logging::init(&options.log);
    tracing::debug!(inner, options = ?options, "starting");

    let result = if inner {
        commands::execute_inner(cli, &options)
    } else {
        commands::execute(cli, &options)
    };

    match result {
        Ok(code) => exit_status(code),
        Err(e) => {
            tracing::error!("fatal error: {e:#}");
            #[allow(clippy::print_stderr)]
            {
                eprintln!("capsa: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

/// Maps a command exit code onto the process exit status.
fn exit_status(code: i32) -> ExitCode {
    u8::try_from(code.rem_euclid(256)).map_or(ExitCode::FAILURE, ExitCode::from)
}
