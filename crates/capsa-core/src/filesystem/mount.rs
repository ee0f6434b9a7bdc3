//! Mount utilities for container filesystem setup.
//!
//! Handles mounting `/proc`, `/dev`, `/dev/pts`, `/dev/shm`, `/tmp` and the
//! host device binds under a new root before it is pivoted into.

use std::path::{Path, PathBuf};

use capsa_common::error::Result;
use nix::mount::MsFlags;

use crate::syscall::Syscall;

/// What has to exist at a mount target before mounting onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// A directory, created with its parents.
    Directory,
    /// A regular file (bind target for a device node), created if absent.
    File,
}

/// One entry of the fixed mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// What to create at the target first.
    pub create: TargetKind,
    /// Mount source: a filesystem name or a host path for binds.
    pub source: &'static str,
    /// Target, absolute inside the container root.
    pub target: &'static str,
    /// Filesystem type; `None` for binds.
    pub fstype: Option<&'static str>,
    /// Mount flags.
    pub flags: MsFlags,
    /// Filesystem specific data.
    pub data: Option<&'static str>,
}

impl MountSpec {
    const fn fs(
        source: &'static str,
        target: &'static str,
        fstype: &'static str,
        data: Option<&'static str>,
    ) -> Self {
        Self {
            create: TargetKind::Directory,
            source,
            target,
            fstype: Some(fstype),
            flags: MsFlags::empty(),
            data,
        }
    }

    const fn bind(path: &'static str) -> Self {
        Self {
            create: TargetKind::File,
            source: path,
            target: path,
            fstype: None,
            flags: MsFlags::MS_BIND,
            data: None,
        }
    }

    /// Resolves the target under `root`.
    #[must_use]
    pub fn target_under(&self, root: &Path) -> PathBuf {
        root.join(self.target.trim_start_matches('/'))
    }
}

/// The standard mounts, in the order they must be performed.
///
/// `/dev` comes first because every later `/dev/*` target lives on it.
pub const STANDARD_MOUNTS: [MountSpec; 13] = [
    MountSpec::fs("tmpfs", "/dev", "tmpfs", Some("mode=755")),
    MountSpec::fs("tmpfs", "/tmp", "tmpfs", Some("mode=1777")),
    MountSpec::fs("devpts", "/dev/pts", "devpts", Some("mode=620,ptmxmode=666")),
    MountSpec::fs("proc", "/proc", "proc", None),
    MountSpec::fs("shm", "/dev/shm", "tmpfs", None),
    MountSpec::bind("/dev/tty"),
    MountSpec::bind("/dev/urandom"),
    MountSpec::bind("/dev/random"),
    MountSpec::bind("/dev/null"),
    MountSpec::bind("/dev/full"),
    MountSpec::bind("/dev/zero"),
    MountSpec::bind("/dev/fuse"),
    MountSpec::bind("/etc/resolv.conf"),
];

/// Makes every mount in the current namespace private, so nothing done
/// afterwards propagates back to the host.
///
/// # Errors
///
/// Returns an error if the remount fails.
pub fn make_private(sys: &dyn Syscall) -> Result<()> {
    sys.mount(
        None,
        Path::new("/"),
        None,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None,
    )?;
    tracing::debug!("root mount tree made private");
    Ok(())
}

/// Recursively bind-mounts `path` onto itself so it is a mount point,
/// which `pivot_root(2)` requires of the new root.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
pub fn bind_self(sys: &dyn Syscall, path: &Path) -> Result<()> {
    bind_mount(sys, path, path)
}

/// Creates a recursive bind mount from source to target.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
pub fn bind_mount(sys: &dyn Syscall, source: &Path, target: &Path) -> Result<()> {
    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        "creating bind mount"
    );
    sys.mount(
        Some(source),
        target,
        None,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None,
    )
}

/// Mounts [`STANDARD_MOUNTS`] under `root`, creating each target right
/// before its mount.
///
/// # Errors
///
/// Returns an error on the first target that cannot be created or mounted.
pub fn mount_pseudo_filesystems(sys: &dyn Syscall, root: &Path) -> Result<()> {
    tracing::debug!(rootfs = %root.display(), "mounting essential filesystems");
    for spec in &STANDARD_MOUNTS {
        let target = spec.target_under(root);
        match spec.create {
            TargetKind::Directory => sys.create_dir_all(&target, 0o755)?,
            TargetKind::File => sys.create_file(&target)?,
        }
        tracing::debug!(
            source = spec.source,
            target = %target.display(),
            fstype = spec.fstype.unwrap_or("bind"),
            "mount"
        );
        sys.mount(
            Some(Path::new(spec.source)),
            &target,
            spec.fstype,
            spec.flags,
            spec.data,
        )?;
    }
    Ok(())
}
