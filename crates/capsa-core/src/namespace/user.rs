//! User namespace isolation.
//!
//! Maps container UID/GID 0 onto the caller's real IDs, which is the only
//! mapping an unprivileged process may write for its child.

use std::fmt;
use std::path::PathBuf;

use capsa_common::error::{CapsaError, Result};
use nix::unistd::{Gid, Pid, Uid};

/// A single line of `/proc/<pid>/uid_map` or `gid_map`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMap {
    /// First ID inside the namespace.
    pub container_id: u32,
    /// First ID on the host.
    pub host_id: u32,
    /// Number of consecutive IDs mapped.
    pub size: u32,
}

impl IdMap {
    /// Maps container ID 0 onto `host_id`, size 1.
    #[must_use]
    pub const fn root_to(host_id: u32) -> Self {
        Self {
            container_id: 0,
            host_id,
            size: 1,
        }
    }

    /// Root mapping for the calling process's real UID.
    #[must_use]
    pub fn current_uid() -> Self {
        Self::root_to(Uid::current().as_raw())
    }

    /// Root mapping for the calling process's real GID.
    #[must_use]
    pub fn current_gid() -> Self {
        Self::root_to(Gid::current().as_raw())
    }
}

impl fmt::Display for IdMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.container_id, self.host_id, self.size)
    }
}

/// Writes UID/GID mappings for the user namespace of `pid`.
///
/// `setgroups` is denied first, as required before an unprivileged
/// process may write `gid_map`.
///
/// # Errors
///
/// Returns an error if writing to `/proc/[pid]/setgroups`,
/// `/proc/[pid]/uid_map` or `/proc/[pid]/gid_map` fails.
pub fn write_id_mappings(pid: Pid, uid_map: &IdMap, gid_map: &IdMap) -> Result<()> {
    let proc_dir = PathBuf::from(format!("/proc/{pid}"));

    let setgroups_path = proc_dir.join("setgroups");
    if setgroups_path.exists() {
        std::fs::write(&setgroups_path, "deny")
            .map_err(|e| CapsaError::io(&setgroups_path, e))?;
    }

    let uid_map_path = proc_dir.join("uid_map");
    std::fs::write(&uid_map_path, uid_map.to_string())
        .map_err(|e| CapsaError::io(&uid_map_path, e))?;

    let gid_map_path = proc_dir.join("gid_map");
    std::fs::write(&gid_map_path, gid_map.to_string())
        .map_err(|e| CapsaError::io(&gid_map_path, e))?;

    tracing::debug!(%pid, uid_map = %uid_map, gid_map = %gid_map, "wrote UID/GID map");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_line_format() {
        assert_eq!(IdMap::root_to(1000).to_string(), "0 1000 1");
    }

    #[test]
    fn current_maps_use_real_ids() {
        assert_eq!(IdMap::current_uid().host_id, Uid::current().as_raw());
        assert_eq!(IdMap::current_gid().host_id, Gid::current().as_raw());
        assert_eq!(IdMap::current_uid().size, 1);
    }
}
