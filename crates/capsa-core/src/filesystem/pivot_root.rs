//! Secure root filesystem switching via `pivot_root(2)`.
//!
//! More secure than `chroot` because it actually changes the root mount
//! point rather than just the process's view of `/`. The old root stays
//! reachable at `/.pivot_root` until [`OldRoot::detach`] is called, which
//! is the window in which caller volumes are relocated from it.

use std::path::{Path, PathBuf};

use capsa_common::constants::PIVOT_DIR;
use capsa_common::error::{CapsaError, Result};
use capsa_common::types::VolumeSpec;
use nix::mount::MntFlags;

use crate::filesystem::mount::bind_mount;
use crate::syscall::Syscall;

/// The old root filesystem, parked under the new root after a pivot.
pub struct OldRoot<'a> {
    sys: &'a dyn Syscall,
    path: PathBuf,
    attached: bool,
}

impl std::fmt::Debug for OldRoot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OldRoot")
            .field("path", &self.path)
            .field("attached", &self.attached)
            .finish_non_exhaustive()
    }
}

/// Switches the root filesystem to `new_root` using `pivot_root(2)`.
///
/// The old root is moved to `<new_root>/.pivot_root` and is returned
/// attached; it must be detached once nothing more is needed from it.
///
/// # Errors
///
/// Returns an error if the park directory cannot be created or
/// `pivot_root(2)` fails.
pub fn pivot<'a>(sys: &'a dyn Syscall, new_root: &Path) -> Result<OldRoot<'a>> {
    let put_old = new_root.join(PIVOT_DIR);
    sys.create_dir_all(&put_old, 0o700)?;

    tracing::info!(new_root = %new_root.display(), "performing pivot_root");
    sys.pivot_root(new_root, &put_old)?;

    Ok(OldRoot {
        sys,
        path: Path::new("/").join(PIVOT_DIR),
        attached: true,
    })
}

impl OldRoot<'_> {
    /// Where the old root is reachable from inside the new root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the old root is still mounted.
    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.attached
    }

    /// Bind-mounts a host directory, reached through the old root, onto
    /// its container path. The container path is created first.
    ///
    /// # Errors
    ///
    /// Returns [`CapsaError::OldRootDetached`] once the old root has been
    /// detached, or an error if the target cannot be created or mounted.
    pub fn relocate(&self, volume: &VolumeSpec) -> Result<()> {
        if !self.attached {
            return Err(CapsaError::OldRootDetached {
                volume: volume.to_string(),
            });
        }
        let source = volume.source_under(&self.path);
        self.sys.create_dir_all(&volume.container_path, 0o700)?;
        bind_mount(self.sys, &source, &volume.container_path)?;
        tracing::info!(volume = %volume, "volume relocated");
        Ok(())
    }

    /// Lazily unmounts the old root: it disappears from the namespace now
    /// and is released once the last reference to it is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if `umount2(2)` fails. Detaching twice is a no-op.
    pub fn detach(&mut self) -> Result<()> {
        if !self.attached {
            return Ok(());
        }
        self.sys.umount2(&self.path, MntFlags::MNT_DETACH)?;
        self.attached = false;
        tracing::info!(path = %self.path.display(), "old root detached");
        Ok(())
    }
}
