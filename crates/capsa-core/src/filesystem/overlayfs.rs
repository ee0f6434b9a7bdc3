//! `OverlayFS` management for layered container filesystems.
//!
//! Stacks read-only lower layers under a single writable upper layer,
//! either with the kernel driver or through a FUSE helper program such as
//! `fuse-overlayfs`, which unprivileged user namespaces usually need.

use std::path::{Path, PathBuf};
use std::process::Command;

use capsa_common::error::{CapsaError, Result};
use nix::mount::MsFlags;

use crate::syscall::Syscall;

/// Configuration for an `OverlayFS` mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Read-only lower layers, topmost first.
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper layer directory.
    pub upper_dir: PathBuf,
    /// Work directory required by `OverlayFS`.
    pub work_dir: PathBuf,
    /// Final merged mount point.
    pub merged_dir: PathBuf,
}

impl OverlayConfig {
    /// Builds the `lowerdir=..,upperdir=..,workdir=..` option string,
    /// followed by `extra` options when given.
    #[must_use]
    pub fn mount_data(&self, extra: Option<&str>) -> String {
        let lowers = self
            .lower_dirs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        let mut opts = format!(
            "lowerdir={},upperdir={},workdir={}",
            lowers,
            self.upper_dir.display(),
            self.work_dir.display()
        );
        if let Some(extra) = extra.filter(|e| !e.is_empty()) {
            opts.push(',');
            opts.push_str(extra);
        }
        opts
    }

    /// Creates the upper, work and merged directories if they do not exist.
    fn create_dirs(&self, sys: &dyn Syscall) -> Result<()> {
        for dir in [&self.upper_dir, &self.work_dir, &self.merged_dir] {
            sys.create_dir_all(dir, 0o755)?;
        }
        Ok(())
    }
}

/// Mounts an `OverlayFS` with the kernel driver.
///
/// # Errors
///
/// Returns an error if directory creation fails or if the mount syscall fails.
pub fn mount_overlay(sys: &dyn Syscall, config: &OverlayConfig, extra: Option<&str>) -> Result<()> {
    config.create_dirs(sys)?;
    let opts = config.mount_data(extra);
    sys.mount(
        Some(Path::new("overlay")),
        &config.merged_dir,
        Some("overlay"),
        MsFlags::empty(),
        Some(opts.as_str()),
    )?;
    tracing::info!(merged = %config.merged_dir.display(), "overlayfs mounted");
    Ok(())
}

/// Mounts an `OverlayFS` by running `program -o <options> <merged>`.
///
/// # Errors
///
/// Returns an error if the helper cannot be started or exits unsuccessfully.
pub fn mount_with_program(
    sys: &dyn Syscall,
    program: &Path,
    config: &OverlayConfig,
    extra: Option<&str>,
) -> Result<()> {
    config.create_dirs(sys)?;
    let opts = config.mount_data(extra);
    tracing::debug!(program = %program.display(), opts = %opts, "running overlay mount program");

    let status = Command::new(program)
        .arg("-o")
        .arg(&opts)
        .arg(&config.merged_dir)
        .status()
        .map_err(|e| CapsaError::io(program, e))?;
    if !status.success() {
        return Err(CapsaError::syscall(
            "overlay mount program",
            &config.merged_dir,
            std::io::Error::other(format!("{} exited with {status}", program.display())),
        ));
    }

    tracing::info!(merged = %config.merged_dir.display(), "overlayfs mounted via helper");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::{LinuxSyscall, Operation, RecordingSyscall, SyscallEvent};

    fn config(root: &Path) -> OverlayConfig {
        OverlayConfig {
            lower_dirs: vec![root.join("l/AAA"), root.join("l/BBB")],
            upper_dir: root.join("diff"),
            work_dir: root.join("work"),
            merged_dir: root.join("merged"),
        }
    }

    #[test]
    fn mount_data_joins_lowers_topmost_first() {
        let cfg = config(Path::new("/g"));
        assert_eq!(
            cfg.mount_data(None),
            "lowerdir=/g/l/AAA:/g/l/BBB,upperdir=/g/diff,workdir=/g/work"
        );
        assert_eq!(
            cfg.mount_data(Some("nodev")),
            "lowerdir=/g/l/AAA:/g/l/BBB,upperdir=/g/diff,workdir=/g/work,nodev"
        );
    }

    #[test]
    fn kernel_mount_creates_dirs_then_mounts_merged() {
        let sys = RecordingSyscall::new();
        let cfg = config(Path::new("/g"));
        mount_overlay(&sys, &cfg, None).unwrap();

        let events = sys.events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[2], SyscallEvent::CreateDir(PathBuf::from("/g/merged")));
        assert_eq!(events[3].operation(), Operation::Mount);
        assert_eq!(events[3].target(), Path::new("/g/merged"));
    }

    #[test]
    fn helper_exit_status_is_checked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config(dir.path());

        mount_with_program(&LinuxSyscall, Path::new("/bin/true"), &cfg, None)
            .expect("true succeeds");
        assert!(cfg.merged_dir.is_dir());

        let err = mount_with_program(&LinuxSyscall, Path::new("/bin/false"), &cfg, None)
            .unwrap_err();
        assert!(matches!(err, CapsaError::Syscall { .. }));
    }

    #[test]
    fn missing_helper_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = mount_with_program(
            &LinuxSyscall,
            &dir.path().join("no-such-helper"),
            &config(dir.path()),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CapsaError::Io { .. }));
    }
}
