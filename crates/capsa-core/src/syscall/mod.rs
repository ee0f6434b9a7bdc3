//! An interface trait so that root filesystem construction can call the
//! mount and filesystem primitives it needs without depending on their
//! implementation.

mod linux;
mod record;

use std::path::Path;

use capsa_common::error::Result;
use nix::mount::{MntFlags, MsFlags};

pub use linux::LinuxSyscall;
pub use record::{Operation, RecordingSyscall, SyscallEvent};

/// Kernel and filesystem functionality required to build a container root.
pub trait Syscall {
    /// `mount(2)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails.
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()>;

    /// `umount2(2)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount fails.
    fn umount2(&self, target: &Path, flags: MntFlags) -> Result<()>;

    /// `pivot_root(2)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be switched.
    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<()>;

    /// Changes the working directory of the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be entered.
    fn chdir(&self, path: &Path) -> Result<()>;

    /// Creates a directory and all missing parents with `mode`.
    ///
    /// # Errors
    ///
    /// Returns an error if any directory cannot be created.
    fn create_dir_all(&self, path: &Path, mode: u32) -> Result<()>;

    /// Creates an empty file if it does not exist, never truncating one
    /// that does. Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    fn create_file(&self, path: &Path) -> Result<()>;

    /// Creates `link` pointing at `original`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot be created.
    fn symlink(&self, original: &Path, link: &Path) -> Result<()>;
}
