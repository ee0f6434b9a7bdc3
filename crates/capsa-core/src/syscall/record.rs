use std::cell::RefCell;
use std::path::{Path, PathBuf};

use capsa_common::error::{CapsaError, Result};
use nix::mount::{MntFlags, MsFlags};

use super::Syscall;

/// Kind of operation issued through the [`Syscall`] seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `mount(2)`.
    Mount,
    /// `umount2(2)`.
    Umount,
    /// `pivot_root(2)`.
    PivotRoot,
    /// `chdir(2)`.
    Chdir,
    /// Directory creation.
    CreateDir,
    /// File creation.
    CreateFile,
    /// Symlink creation.
    Symlink,
}

impl Operation {
    /// Operation name used in error reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mount => "mount",
            Self::Umount => "umount2",
            Self::PivotRoot => "pivot_root",
            Self::Chdir => "chdir",
            Self::CreateDir => "mkdir",
            Self::CreateFile => "create",
            Self::Symlink => "symlink",
        }
    }
}

/// One recorded call, with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyscallEvent {
    /// A mount request.
    Mount {
        /// Mount source.
        source: Option<PathBuf>,
        /// Mount target.
        target: PathBuf,
        /// Filesystem type.
        fstype: Option<String>,
        /// Mount flags.
        flags: MsFlags,
        /// Filesystem specific data.
        data: Option<String>,
    },
    /// An unmount request.
    Umount {
        /// Unmounted path.
        target: PathBuf,
        /// Unmount flags.
        flags: MntFlags,
    },
    /// A root switch.
    PivotRoot {
        /// New root.
        new_root: PathBuf,
        /// Where the old root is parked.
        put_old: PathBuf,
    },
    /// A working directory change.
    Chdir(PathBuf),
    /// A directory creation.
    CreateDir(PathBuf),
    /// A file creation.
    CreateFile(PathBuf),
    /// A symlink creation.
    Symlink {
        /// Link target.
        original: PathBuf,
        /// Link path.
        link: PathBuf,
    },
}

impl SyscallEvent {
    /// Returns the kind of operation this event records.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        match self {
            Self::Mount { .. } => Operation::Mount,
            Self::Umount { .. } => Operation::Umount,
            Self::PivotRoot { .. } => Operation::PivotRoot,
            Self::Chdir(_) => Operation::Chdir,
            Self::CreateDir(_) => Operation::CreateDir,
            Self::CreateFile(_) => Operation::CreateFile,
            Self::Symlink { .. } => Operation::Symlink,
        }
    }

    /// Returns the path the operation was applied to.
    #[must_use]
    pub fn target(&self) -> &Path {
        match self {
            Self::Mount { target, .. } | Self::Umount { target, .. } => target,
            Self::PivotRoot { new_root, .. } => new_root,
            Self::Chdir(p) | Self::CreateDir(p) | Self::CreateFile(p) => p,
            Self::Symlink { link, .. } => link,
        }
    }
}

/// [`Syscall`] implementation that records calls in issue order instead
/// of performing them.
///
/// Calls of an operation registered with [`RecordingSyscall::fail_on`]
/// return an error and are not recorded.
#[derive(Debug, Default)]
pub struct RecordingSyscall {
    events: RefCell<Vec<SyscallEvent>>,
    failing: RefCell<Vec<Operation>>,
}

impl RecordingSyscall {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later call of `operation` fail with `EPERM`.
    pub fn fail_on(&self, operation: Operation) {
        self.failing.borrow_mut().push(operation);
    }

    /// Returns all recorded events in issue order.
    #[must_use]
    pub fn events(&self) -> Vec<SyscallEvent> {
        self.events.borrow().clone()
    }

    /// Returns the recorded events of one operation kind.
    #[must_use]
    pub fn events_of(&self, operation: Operation) -> Vec<SyscallEvent> {
        self.events
            .borrow()
            .iter()
            .filter(|e| e.operation() == operation)
            .cloned()
            .collect()
    }

    fn record(&self, event: SyscallEvent) -> Result<()> {
        if self.failing.borrow().contains(&event.operation()) {
            return Err(CapsaError::syscall(
                event.operation().name(),
                event.target(),
                std::io::Error::from_raw_os_error(libc::EPERM),
            ));
        }
        self.events.borrow_mut().push(event);
        Ok(())
    }
}

impl Syscall for RecordingSyscall {
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        self.record(SyscallEvent::Mount {
            source: source.map(Path::to_path_buf),
            target: target.to_path_buf(),
            fstype: fstype.map(str::to_owned),
            flags,
            data: data.map(str::to_owned),
        })
    }

    fn umount2(&self, target: &Path, flags: MntFlags) -> Result<()> {
        self.record(SyscallEvent::Umount {
            target: target.to_path_buf(),
            flags,
        })
    }

    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<()> {
        self.record(SyscallEvent::PivotRoot {
            new_root: new_root.to_path_buf(),
            put_old: put_old.to_path_buf(),
        })
    }

    fn chdir(&self, path: &Path) -> Result<()> {
        self.record(SyscallEvent::Chdir(path.to_path_buf()))
    }

    fn create_dir_all(&self, path: &Path, _mode: u32) -> Result<()> {
        self.record(SyscallEvent::CreateDir(path.to_path_buf()))
    }

    fn create_file(&self, path: &Path) -> Result<()> {
        self.record(SyscallEvent::CreateFile(path.to_path_buf()))
    }

    fn symlink(&self, original: &Path, link: &Path) -> Result<()> {
        self.record(SyscallEvent::Symlink {
            original: original.to_path_buf(),
            link: link.to_path_buf(),
        })
    }
}
