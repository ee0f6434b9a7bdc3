//! Device symlinks created inside the new root after the pivot.

use std::path::Path;

use capsa_common::error::Result;

use crate::syscall::Syscall;

/// `(original, link)` pairs: each `link` is created pointing at `original`.
pub const DEVICE_LINKS: [(&str, &str); 6] = [
    ("/dev/pts/ptmx", "/dev/ptmx"),
    ("/dev/pts/0", "/dev/console"),
    ("/proc/self/fd", "/dev/fd"),
    ("/proc/self/fd/2", "/dev/stderr"),
    ("/proc/self/fd/0", "/dev/stdin"),
    ("/proc/self/fd/1", "/dev/stdout"),
];

/// Creates [`DEVICE_LINKS`] relative to the current root.
///
/// # Errors
///
/// Returns an error on the first link that cannot be created.
pub fn create_device_links(sys: &dyn Syscall) -> Result<()> {
    for (original, link) in DEVICE_LINKS {
        sys.symlink(Path::new(original), Path::new(link))?;
    }
    tracing::debug!(count = DEVICE_LINKS.len(), "device links created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::syscall::{RecordingSyscall, SyscallEvent};

    #[test]
    fn ptmx_and_standard_streams_are_linked() {
        let sys = RecordingSyscall::new();
        create_device_links(&sys).unwrap();

        let events = sys.events();
        assert_eq!(events.len(), 6);
        assert_eq!(
            events[0],
            SyscallEvent::Symlink {
                original: PathBuf::from("/dev/pts/ptmx"),
                link: PathBuf::from("/dev/ptmx"),
            }
        );
        assert!(events.contains(&SyscallEvent::Symlink {
            original: PathBuf::from("/proc/self/fd/1"),
            link: PathBuf::from("/dev/stdout"),
        }));
    }
}
