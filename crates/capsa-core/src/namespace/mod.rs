//! Linux namespace management for container isolation.
//!
//! Namespaces are requested as `clone(2)` flags on a freshly created
//! process: PID namespace membership in particular cannot be changed for
//! the calling process, so the launcher never unshares itself.

pub mod user;

use nix::sched::CloneFlags;

/// Configuration for which namespaces the re-executed child is created in.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceConfig {
    /// Isolate the mount table.
    pub mount: bool,
    /// Isolate hostname and domain name.
    pub uts: bool,
    /// Isolate System V IPC and POSIX message queues.
    pub ipc: bool,
    /// Isolate the PID space; the child becomes PID 1.
    pub pid: bool,
    /// Isolate UIDs/GIDs; the child gets a single-entry identity mapping.
    pub user: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            mount: true,
            uts: true,
            ipc: true,
            pid: true,
            user: true,
        }
    }
}

impl NamespaceConfig {
    /// Returns the `clone(2)` flags selecting the configured namespaces.
    #[must_use]
    pub fn clone_flags(&self) -> CloneFlags {
        let mut flags = CloneFlags::empty();
        for (enabled, flag) in [
            (self.mount, CloneFlags::CLONE_NEWNS),
            (self.uts, CloneFlags::CLONE_NEWUTS),
            (self.ipc, CloneFlags::CLONE_NEWIPC),
            (self.pid, CloneFlags::CLONE_NEWPID),
            (self.user, CloneFlags::CLONE_NEWUSER),
        ] {
            if enabled {
                flags |= flag;
            }
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_requests_all_five_namespaces() {
        let flags = NamespaceConfig::default().clone_flags();
        assert_eq!(
            flags,
            CloneFlags::CLONE_NEWNS
                | CloneFlags::CLONE_NEWUTS
                | CloneFlags::CLONE_NEWIPC
                | CloneFlags::CLONE_NEWPID
                | CloneFlags::CLONE_NEWUSER
        );
        assert!(!flags.contains(CloneFlags::CLONE_NEWNET));
    }

    #[test]
    fn disabled_namespaces_are_left_out() {
        let config = NamespaceConfig {
            user: false,
            ipc: false,
            ..NamespaceConfig::default()
        };
        let flags = config.clone_flags();
        assert!(!flags.contains(CloneFlags::CLONE_NEWUSER));
        assert!(!flags.contains(CloneFlags::CLONE_NEWIPC));
        assert!(flags.contains(CloneFlags::CLONE_NEWPID));
    }
}
