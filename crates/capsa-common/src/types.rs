//! Domain primitive types used across the capsa workspace.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CapsaError;

/// Unique identifier for an image in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(String);

impl ImageId {
    /// Creates a new image ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of a mountable layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(String);

impl LayerId {
    /// Creates a new layer ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns whether the ID is empty (an image without layers).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A caller-declared volume, written `hostPath:containerPath`.
///
/// The host path is reached through the parked old root after
/// `pivot_root`, so it is stored absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Directory on the host.
    pub host_path: PathBuf,
    /// Mount point inside the container.
    pub container_path: PathBuf,
}

impl VolumeSpec {
    /// Location of the host path once the old root sits at `old_root`.
    #[must_use]
    pub fn source_under(&self, old_root: &Path) -> PathBuf {
        old_root.join(self.host_path.strip_prefix("/").unwrap_or(&self.host_path))
    }
}

impl fmt::Display for VolumeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.host_path.display(),
            self.container_path.display()
        )
    }
}

impl FromStr for VolumeSpec {
    type Err = CapsaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| CapsaError::Config {
            message: format!("invalid volume {s:?}: {reason}"),
        };

        let (host, container) = s
            .split_once(':')
            .ok_or_else(|| invalid("expected hostPath:containerPath"))?;
        if host.is_empty() || container.is_empty() {
            return Err(invalid("empty path"));
        }
        if container.contains(':') {
            return Err(invalid("too many ':' separators"));
        }

        let container_path = PathBuf::from(container);
        if !container_path.is_absolute() {
            return Err(invalid("container path must be absolute"));
        }
        let host_path = std::path::absolute(host).map_err(|e| CapsaError::io(host, e))?;

        Ok(Self {
            host_path,
            container_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_parses_host_then_container() {
        let vol: VolumeSpec = "/host/data:/data".parse().unwrap();
        assert_eq!(vol.host_path, PathBuf::from("/host/data"));
        assert_eq!(vol.container_path, PathBuf::from("/data"));
        assert_eq!(vol.to_string(), "/host/data:/data");
    }

    #[test]
    fn volume_source_is_reached_through_old_root() {
        let vol: VolumeSpec = "/host/data:/data".parse().unwrap();
        assert_eq!(
            vol.source_under(Path::new("/.pivot_root")),
            PathBuf::from("/.pivot_root/host/data")
        );
    }

    #[test]
    fn relative_host_path_is_made_absolute() {
        let vol: VolumeSpec = "data:/data".parse().unwrap();
        assert!(vol.host_path.is_absolute());
        assert!(vol.host_path.ends_with("data"));
    }

    #[test]
    fn volume_rejects_malformed_specs() {
        for bad in ["/only-one", ":/data", "/host:", "/a:/b:/c", "/host:relative"] {
            assert!(bad.parse::<VolumeSpec>().is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn empty_layer_id_is_detected() {
        assert!(LayerId::default().is_empty());
        assert!(!LayerId::new("abc").is_empty());
    }
}
