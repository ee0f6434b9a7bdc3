//! Process-wide runtime options.
//!
//! Resolved once at startup in the launcher and handed to the re-executed
//! inner phase through `_CONTAINER_*` environment variables, since the two
//! phases are distinct process images.

use std::path::{Path, PathBuf};

use crate::constants;

/// Runtime options shared by both process phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Ephemeral runtime state directory of the backing store.
    pub run_root: PathBuf,
    /// Persistent layer storage directory of the backing store.
    pub graph_root: PathBuf,
    /// Log destination.
    pub log: PathBuf,
    /// Comma-separated storage driver options.
    pub storage_opt: String,
}

/// Values supplied explicitly (flags or environment) before defaulting.
///
/// Empty values are treated as unset.
#[derive(Debug, Clone, Default)]
pub struct OptionOverrides {
    /// Explicit run root.
    pub run_root: Option<PathBuf>,
    /// Explicit graph root.
    pub graph_root: Option<PathBuf>,
    /// Explicit log path.
    pub log: Option<PathBuf>,
    /// Explicit storage options.
    pub storage_opt: Option<String>,
}

impl OptionOverrides {
    /// Fills every unset value with its built-in default.
    ///
    /// `uid` is the caller's real UID and `home` its home directory; both
    /// only matter for the run root and graph root defaults.
    #[must_use]
    pub fn resolve(self, uid: u32, home: Option<&Path>) -> RuntimeOptions {
        let run_root = non_empty_path(self.run_root)
            .unwrap_or_else(|| PathBuf::from(constants::default_run_root(uid)));
        let graph_root = non_empty_path(self.graph_root).unwrap_or_else(|| {
            home.unwrap_or_else(|| Path::new(""))
                .join(constants::DEFAULT_GRAPH_ROOT_SUFFIX)
        });
        let log =
            non_empty_path(self.log).unwrap_or_else(|| PathBuf::from(constants::DEFAULT_LOG_PATH));
        let storage_opt = self
            .storage_opt
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| constants::DEFAULT_STORAGE_OPT.to_owned());

        RuntimeOptions {
            run_root,
            graph_root,
            log,
            storage_opt,
        }
    }
}

fn non_empty_path(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|p| !p.as_os_str().is_empty())
}

impl RuntimeOptions {
    /// Serializes the options as the exact environment of the inner phase.
    #[must_use]
    pub fn to_env(&self) -> Vec<(String, String)> {
        vec![
            (
                constants::RUN_ROOT_ENV.to_owned(),
                self.run_root.display().to_string(),
            ),
            (
                constants::GRAPH_ROOT_ENV.to_owned(),
                self.graph_root.display().to_string(),
            ),
            (
                constants::STORAGE_OPT_ENV.to_owned(),
                self.storage_opt.clone(),
            ),
            (constants::LOG_ENV.to_owned(), self.log.display().to_string()),
        ]
    }

    /// Recovers options from an environment lookup, filling gaps with defaults.
    #[must_use]
    pub fn from_env_with<F>(lookup: F, uid: u32, home: Option<&Path>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        OptionOverrides {
            run_root: lookup(constants::RUN_ROOT_ENV).map(PathBuf::from),
            graph_root: lookup(constants::GRAPH_ROOT_ENV).map(PathBuf::from),
            log: lookup(constants::LOG_ENV).map(PathBuf::from),
            storage_opt: lookup(constants::STORAGE_OPT_ENV),
        }
        .resolve(uid, home)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_follow_uid_and_home() {
        let opts = OptionOverrides::default().resolve(1000, Some(Path::new("/home/alice")));
        assert_eq!(opts.run_root, PathBuf::from("/run/user/1000/containers"));
        assert_eq!(
            opts.graph_root,
            PathBuf::from("/home/alice/.local/share/containers/storage")
        );
        assert_eq!(opts.log, PathBuf::from("/tmp/container.log"));
        assert_eq!(opts.storage_opt, ".mount_program=/usr/bin/fuse-overlayfs");
    }

    #[test]
    fn explicit_values_win_and_empty_values_do_not() {
        let opts = OptionOverrides {
            run_root: Some(PathBuf::from("/srv/run")),
            graph_root: Some(PathBuf::new()),
            log: None,
            storage_opt: Some(String::new()),
        }
        .resolve(0, Some(Path::new("/root")));
        assert_eq!(opts.run_root, PathBuf::from("/srv/run"));
        assert_eq!(
            opts.graph_root,
            PathBuf::from("/root/.local/share/containers/storage")
        );
        assert_eq!(opts.storage_opt, constants::DEFAULT_STORAGE_OPT);
    }

    #[test]
    fn env_handoff_recovers_identical_options() {
        let opts = RuntimeOptions {
            run_root: PathBuf::from("/run/user/1000/containers"),
            graph_root: PathBuf::from("/var/tmp/graph"),
            log: PathBuf::from("/var/tmp/capsa.log"),
            storage_opt: "overlay.mount_program=/bin/fuse-overlayfs,overlay.mountopt=nodev".into(),
        };
        let env: HashMap<String, String> = opts.to_env().into_iter().collect();
        assert_eq!(env.len(), 4);

        // The inner phase runs as UID 0 with no HOME; handoff values must win.
        let recovered = RuntimeOptions::from_env_with(|k| env.get(k).cloned(), 0, None);
        assert_eq!(recovered, opts);
    }
}
