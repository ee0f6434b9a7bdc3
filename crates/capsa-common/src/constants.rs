//! System-wide constants, environment handoff keys and default paths.

/// `argv[0]` given to the re-executed process so it knows it is the
/// inner (namespaced) phase.
pub const REEXEC_ARG0: &str = "capsa-init";

/// Path used by the launcher to re-execute itself.
pub const SELF_EXE: &str = "/proc/self/exe";

/// Environment key carrying the run root to the inner phase.
pub const RUN_ROOT_ENV: &str = "_CONTAINER_RUN_ROOT";
/// Environment key carrying the graph root to the inner phase.
pub const GRAPH_ROOT_ENV: &str = "_CONTAINER_GRAPH_ROOT";
/// Environment key carrying the storage driver options to the inner phase.
pub const STORAGE_OPT_ENV: &str = "_CONTAINER_STORAGE_OPT";
/// Environment key carrying the log destination to the inner phase.
pub const LOG_ENV: &str = "_CONTAINER_LOG";

/// Default storage driver options: mount layers through `fuse-overlayfs`.
pub const DEFAULT_STORAGE_OPT: &str = ".mount_program=/usr/bin/fuse-overlayfs";

/// Default log destination.
pub const DEFAULT_LOG_PATH: &str = "/tmp/container.log";

/// Graph root relative to `$HOME` when none is configured.
pub const DEFAULT_GRAPH_ROOT_SUFFIX: &str = ".local/share/containers/storage";

/// Default level filter when `RUST_LOG` is not set.
pub const DEFAULT_LOG_LEVEL: &str = "debug";

/// Default working directory for the container command.
pub const DEFAULT_WORKDIR: &str = "/";

/// Directory, relative to the new root, where `pivot_root` parks the old root.
pub const PIVOT_DIR: &str = ".pivot_root";

/// Returns the default run root for the given (host) UID.
#[must_use]
pub fn default_run_root(uid: u32) -> String {
    format!("/run/user/{uid}/containers")
}
