//! Root filesystem construction.
//!
//! Mounts the image's top layer, prepares it as a root, pivots into it,
//! relocates volumes out of the old root and finally cuts the old root
//! off. Every step runs through the [`Syscall`] seam, in this order:
//!
//! 1. resolve the image (no mount happens for an unknown image)
//! 2. make the mount tree private and mount the layer
//! 3. bind the layer onto itself and mount the pseudo filesystems in it
//! 4. `pivot_root` into it
//! 5. bind every volume from `/.pivot_root/<host>` to its container path
//! 6. enter the working directory and lazily detach the old root
//! 7. create the device symlinks

use std::path::Path;

use capsa_common::error::Result;
use capsa_common::types::VolumeSpec;
use capsa_core::filesystem::devices::create_device_links;
use capsa_core::filesystem::mount::{bind_self, make_private, mount_pseudo_filesystems};
use capsa_core::filesystem::pivot_root::{OldRoot, pivot};
use capsa_core::syscall::Syscall;
use capsa_image::resolver::{ResolvedImage, resolve_image};
use capsa_image::storage::ImageStore;

/// Builds and enters a container root.
pub struct RootfsBuilder<'a> {
    sys: &'a dyn Syscall,
    store: &'a dyn ImageStore,
}

impl std::fmt::Debug for RootfsBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootfsBuilder").finish_non_exhaustive()
    }
}

impl<'a> RootfsBuilder<'a> {
    /// Creates a builder issuing its calls through `sys` and mounting
    /// layers from `store`.
    #[must_use]
    pub const fn new(sys: &'a dyn Syscall, store: &'a dyn ImageStore) -> Self {
        Self { sys, store }
    }

    /// Runs the whole sequence for `image` and returns the resolved image.
    ///
    /// On return the process's root is the image layer, its working
    /// directory is `workdir` taken from the new root, and the old root is
    /// no longer reachable.
    /// A failure aborts the sequence where it happened; nothing already
    /// mounted is undone, as the mounts belong to the private mount
    /// namespace of this process.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be resolved or any step fails.
    pub fn build(
        &self,
        image: &str,
        volumes: &[VolumeSpec],
        workdir: &Path,
    ) -> Result<ResolvedImage> {
        let resolved = resolve_image(self.store, image)?;

        make_private(self.sys)?;
        let root = self.store.mount_layer(&resolved.top_layer)?;
        tracing::info!(image, root = %root.display(), "image layer mounted");

        bind_self(self.sys, &root)?;
        mount_pseudo_filesystems(self.sys, &root)?;

        let mut old_root = pivot(self.sys, &root)?;
        relocate_volumes(&old_root, volumes)?;

        // A relative path would resolve against the old root.
        let workdir = Path::new("/").join(workdir);
        self.sys.chdir(&workdir)?;
        detach_old_root(&mut old_root)?;

        create_device_links(self.sys)?;
        tracing::info!(image, workdir = %workdir.display(), "root filesystem ready");
        Ok(resolved)
    }
}

/// Relocates every volume from the old root, in declaration order.
///
/// # Errors
///
/// Returns an error on the first volume that cannot be relocated,
/// including when the old root is already detached.
pub fn relocate_volumes(old_root: &OldRoot<'_>, volumes: &[VolumeSpec]) -> Result<()> {
    for volume in volumes {
        old_root.relocate(volume)?;
    }
    Ok(())
}

/// Detaches the old root once every relocation is done.
///
/// # Errors
///
/// Returns an error if the old root cannot be unmounted.
pub fn detach_old_root(old_root: &mut OldRoot<'_>) -> Result<()> {
    old_root.detach()
}
