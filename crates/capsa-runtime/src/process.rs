//! Execution of the container command.
//!
//! Builds the final process image from the resolved program and merged
//! environment, runs it with inherited stdio or on a pty, and reports its
//! exit code.

use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};

use capsa_common::error::{CapsaError, Result};

use crate::tty::{Bridge, PtySession};

/// How the command's standard streams are connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtyMode {
    /// Standard streams are inherited from the runtime.
    Inherit,
    /// A pty bridged to the invoking terminal.
    Terminal,
    /// A pty bridged to an internal pipe.
    Detached,
}

impl TtyMode {
    /// Derives the mode from the `-t` and `-d` flags.
    #[must_use]
    pub const fn from_flags(tty: bool, detach: bool) -> Self {
        match (tty, detach) {
            (false, _) => Self::Inherit,
            (true, false) => Self::Terminal,
            (true, true) => Self::Detached,
        }
    }
}

/// Builds the process image for `program`.
///
/// `args[0]` becomes the process name and the rest its arguments. The
/// environment is exactly `env`; entries without `=` are dropped.
#[must_use]
pub fn build_command(program: &Path, args: &[String], env: &[String]) -> Command {
    let mut command = Command::new(program);
    if let Some((arg0, rest)) = args.split_first() {
        let _ = command.arg0(arg0).args(rest);
    }
    let _ = command.env_clear();
    for entry in env {
        match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                let _ = command.env(key, value);
            }
            _ => tracing::warn!(entry = %entry, "ignoring malformed environment entry"),
        }
    }
    command
}

/// Runs `command` and returns its exit code.
///
/// A failure to wait on a started process is logged and reported as `-1`.
///
/// # Errors
///
/// Returns an error if the process cannot be started or the pty cannot be
/// attached.
pub fn execute(command: Command, mode: TtyMode) -> Result<i32> {
    match mode {
        TtyMode::Inherit => run_inherited(command),
        TtyMode::Terminal => run_on_pty(command, Bridge::Terminal),
        TtyMode::Detached => run_on_pty(command, Bridge::Detached),
    }
}

fn run_inherited(mut command: Command) -> Result<i32> {
    let child = command
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| start_error(&command, &e))?;
    tracing::info!(pid = child.id(), "command started");
    Ok(wait_for(child))
}

fn run_on_pty(command: Command, bridge: Bridge) -> Result<i32> {
    let (mut session, mut child) = PtySession::spawn(command)?;

    if let Err(e) = session.attach(bridge) {
        let _ = child.kill();
        let _ = child.wait();
        return Err(e);
    }

    let drained = match bridge {
        Bridge::Terminal => session.drain_output(&mut io::stdout().lock()),
        Bridge::Detached => session.drain_output(&mut io::sink()),
    };
    if let Err(e) = drained {
        tracing::warn!(error = %e, "pty output copy failed");
    }

    let code = wait_for(child);
    drop(session);
    Ok(code)
}

fn wait_for(mut child: Child) -> i32 {
    match child.wait() {
        Ok(status) => {
            let code = exit_code(status);
            tracing::info!(pid = child.id(), code, "command exited");
            code
        }
        Err(e) => {
            tracing::warn!(pid = child.id(), error = %e, "failed to wait for command");
            -1
        }
    }
}

/// Converts a wait status to an exit code; a signal `n` yields `128 + n`.
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

fn start_error(command: &Command, error: &io::Error) -> CapsaError {
    CapsaError::Process {
        message: format!("cannot start {:?}: {error}", command.get_program()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn mode_follows_tty_and_detach_flags() {
        assert_eq!(TtyMode::from_flags(false, false), TtyMode::Inherit);
        assert_eq!(TtyMode::from_flags(false, true), TtyMode::Inherit);
        assert_eq!(TtyMode::from_flags(true, false), TtyMode::Terminal);
        assert_eq!(TtyMode::from_flags(true, true), TtyMode::Detached);
    }

    #[test]
    fn command_environment_is_exactly_the_merged_env() {
        let command = build_command(
            Path::new("/bin/echo"),
            &strings(&["echo", "hi"]),
            &strings(&["FOO=bar", "BROKEN", "FOO=baz"]),
        );
        let envs: Vec<_> = command.get_envs().collect();
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].1, Some(std::ffi::OsStr::new("baz")));
        assert_eq!(command.get_args().collect::<Vec<_>>(), vec!["hi"]);
    }

    #[test]
    fn exit_codes_are_propagated() {
        let code = execute(
            build_command(
                Path::new("/bin/sh"),
                &strings(&["sh", "-c", "exit 3"]),
                &[],
            ),
            TtyMode::Inherit,
        )
        .unwrap();
        assert_eq!(code, 3);
    }

    #[test]
    fn signalled_command_reports_128_plus_signal() {
        let code = execute(
            build_command(
                Path::new("/bin/sh"),
                &strings(&["sh", "-c", "kill -9 $$"]),
                &[],
            ),
            TtyMode::Inherit,
        )
        .unwrap();
        assert_eq!(code, 137);
    }

    #[test]
    fn missing_program_fails_to_start() {
        let err = execute(
            build_command(Path::new("/nonexistent/prog"), &strings(&["prog"]), &[]),
            TtyMode::Inherit,
        )
        .unwrap_err();
        assert!(matches!(err, CapsaError::Process { .. }));
    }

    #[test]
    fn detached_pty_run_reports_exit_code() {
        let code = execute(
            build_command(
                Path::new("/bin/sh"),
                &strings(&["sh", "-c", "test \"$FOO\" = bar"]),
                &strings(&["FOO=bar"]),
            ),
            TtyMode::Detached,
        )
        .unwrap();
        assert_eq!(code, 0);
    }
}
