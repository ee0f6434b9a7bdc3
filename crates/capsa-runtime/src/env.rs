//! Environment merging and executable lookup.

use std::path::{Path, PathBuf};

use capsa_common::error::{CapsaError, Result};

/// Concatenates image and caller environments, image entries first.
///
/// Nothing is deduplicated; when a name appears twice the later entry is
/// the one a process sees.
#[must_use]
pub fn merge_env(image: &[String], caller: &[String]) -> Vec<String> {
    image.iter().chain(caller).cloned().collect()
}

/// Returns the value of the effective `PATH` entry, if any.
#[must_use]
pub fn path_env(env: &[String]) -> Option<&str> {
    env.iter().rev().find_map(|e| e.strip_prefix("PATH="))
}

/// Resolves `name` to a file on disk using the `PATH` found in `env`.
///
/// # Errors
///
/// Returns [`CapsaError::NotFound`] if no candidate exists.
pub fn resolve_program(name: &str, env: &[String]) -> Result<PathBuf> {
    resolve_program_with(name, path_env(env), |p| p.is_file())
}

/// Resolves `name` against `path`, probing candidates with `exists`.
///
/// `name` itself is probed first, then each `PATH` entry in order. The
/// search stops at the first candidate `exists` accepts.
///
/// # Errors
///
/// Returns [`CapsaError::NotFound`] if no candidate is accepted.
pub fn resolve_program_with<F>(name: &str, path: Option<&str>, mut exists: F) -> Result<PathBuf>
where
    F: FnMut(&Path) -> bool,
{
    let relative = name.trim_start_matches('/');
    let candidates = std::iter::once(PathBuf::from(name)).chain(
        path.into_iter()
            .flat_map(|p| p.split(':'))
            .filter(|dir| !dir.is_empty())
            .map(|dir| Path::new(dir).join(relative)),
    );

    for candidate in candidates {
        if exists(&candidate) {
            tracing::debug!(name, path = %candidate.display(), "resolved program");
            return Ok(candidate);
        }
    }

    Err(CapsaError::NotFound {
        kind: "executable",
        id: name.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn merge_keeps_both_lists_in_order() {
        let image = strings(&["PATH=/bin", "A=1"]);
        let caller = strings(&["A=2", "FOO=bar"]);
        let merged = merge_env(&image, &caller);
        assert_eq!(merged.len(), 4);
        let (left, right) = merged.split_at(image.len());
        assert_eq!(left, image.as_slice());
        assert_eq!(right, caller.as_slice());
    }

    #[test]
    fn later_path_entry_is_effective() {
        let env = strings(&["PATH=/image/bin", "HOME=/root", "PATH=/caller/bin"]);
        assert_eq!(path_env(&env), Some("/caller/bin"));
        assert_eq!(path_env(&strings(&["HOME=/"])), None);
    }

    #[test]
    fn absolute_existing_path_is_returned_unchanged() {
        let mut probed = Vec::new();
        let found = resolve_program_with("/bin/echo", Some("/usr/bin:/bin"), |p| {
            probed.push(p.to_path_buf());
            true
        })
        .unwrap();
        assert_eq!(found, PathBuf::from("/bin/echo"));
        assert_eq!(probed.len(), 1);
    }

    #[test]
    fn search_stops_at_first_matching_entry() {
        let mut probed = Vec::new();
        let found = resolve_program_with("ls", Some("/a:/b:/c"), |p| {
            probed.push(p.to_path_buf());
            p == Path::new("/b/ls")
        })
        .unwrap();
        assert_eq!(found, PathBuf::from("/b/ls"));
        assert_eq!(
            probed,
            vec![
                PathBuf::from("ls"),
                PathBuf::from("/a/ls"),
                PathBuf::from("/b/ls")
            ]
        );
    }

    #[test]
    fn unresolved_name_is_not_found() {
        let err = resolve_program_with("nope", Some("/a"), |_| false).unwrap_err();
        assert!(matches!(err, CapsaError::NotFound { kind: "executable", .. }));
    }

    #[test]
    fn resolves_against_real_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("tool"), b"").unwrap();

        let env = vec![format!("PATH=/nonexistent:{}", bin.display())];
        assert_eq!(resolve_program("tool", &env).unwrap(), bin.join("tool"));
    }
}
